use crate::{stream::BinReader, FormatError, Result};
use flate2::read::GzDecoder;
use std::io::{self, Chain, Cursor, Read};

const MAGIC: &[u8; 4] = b"PDN3";
const FLAG_PLAIN: [u8; 2] = [0x00, 0x01];
const FLAG_GZIP: [u8; 2] = [0x1F, 0x8B];

/// A PDN file with its envelope peeled off: the optional 2.1+ XML document
/// header and the fully-decompressed NRBF payload.
///
/// Files written by Paint.NET 2.0 and earlier have no envelope at all; they
/// start straight with the gzip magic.
#[derive(Debug)]
pub(crate) struct Envelope<R>
where
    R: Read,
{
    pub(crate) header_xml: Option<String>,
    pub(crate) body: Body<R>,
}

/// The NRBF payload stream.
///
/// When the inner flag announces gzip, the two sniffed flag bytes are pushed
/// back in front of the decoder; the input itself is never seeked.
#[derive(Debug)]
pub(crate) enum Body<R>
where
    R: Read,
{
    Plain(R),
    Gzip(GzDecoder<Chain<Cursor<[u8; 2]>, R>>),
}

impl<R> Read for Body<R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Plain(inner) => inner.read(buf),
            Body::Gzip(inner) => inner.read(buf),
        }
    }
}

impl<R> Envelope<R>
where
    R: Read,
{
    pub(crate) fn open(reader: R) -> Result<Self> {
        let mut reader = BinReader::new(reader);
        let mut flag: [u8; 2] = reader.read_array()?;
        let mut header_xml = None;

        if flag == MAGIC[..2] {
            let rest: [u8; 2] = reader.read_array()?;
            if rest != MAGIC[2..] {
                return Err(FormatError::BadEnvelope.into());
            }

            // A 24-bit little-endian byte count, zero-extended. Bytes, not
            // characters; the header may decode to fewer characters.
            let len: [u8; 3] = reader.read_array()?;
            let len = u32::from_le_bytes([len[0], len[1], len[2], 0]);

            let xml = reader.read_vec(len as usize)?;
            let xml = String::from_utf8(xml).map_err(|_| FormatError::BadUtf8)?;
            header_xml = Some(xml);

            flag = reader.read_array()?;
        }

        let inner = reader.into_inner();
        let body = match flag {
            FLAG_PLAIN => Body::Plain(inner),
            FLAG_GZIP => Body::Gzip(GzDecoder::new(Cursor::new(FLAG_GZIP).chain(inner))),
            _ => return Err(FormatError::BadEnvelope.into()),
        };

        Ok(Self { header_xml, body })
    }
}
