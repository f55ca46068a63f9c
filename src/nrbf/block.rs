use crate::{stream::BinReader, FormatError, Result};
use flate2::read::GzDecoder;
use std::io::Read;

/// Reassembles the chunked payload of a deferred `MemoryBlock`.
///
/// The chunk framing is big-endian inside the otherwise little-endian
/// stream. Chunks may arrive in any order; `format_version` 0 gzips every
/// chunk payload, 1 stores it verbatim.
pub(crate) fn read_chunked<R>(reader: &mut BinReader<R>, length: u64) -> Result<Vec<u8>>
where
    R: Read,
{
    let format_version = reader.read_u8()?;
    if format_version > 1 {
        return Err(FormatError::BadMemoryBlock("unknown format version").into());
    }

    let chunk_size = u64::from(reader.read_be_u32()?);
    if chunk_size == 0 && length > 0 {
        return Err(FormatError::BadMemoryBlock("zero chunk size").into());
    }

    let chunk_count = if length == 0 {
        0
    } else {
        (length - 1) / chunk_size + 1
    };
    let chunk_count = usize::try_from(chunk_count)
        .map_err(|_| FormatError::BadMemoryBlock("block too large"))?;
    let mut chunks: Vec<Option<Vec<u8>>> = vec![None; chunk_count];

    for _ in 0..chunk_count {
        let chunk_number = u64::from(reader.read_be_u32()?);
        let data_size = reader.read_be_u32()? as usize;

        if chunk_number >= chunk_count as u64 {
            return Err(FormatError::BadMemoryBlock("chunk number out of range").into());
        }
        if chunks[chunk_number as usize].is_some() {
            return Err(FormatError::BadMemoryBlock("duplicate chunk").into());
        }

        let payload = reader.read_vec(data_size)?;
        let bytes = if format_version == 0 {
            let mut bytes = Vec::new();
            GzDecoder::new(payload.as_slice()).read_to_end(&mut bytes)?;
            bytes
        } else {
            payload
        };

        let expected = chunk_size.min(length - chunk_number * chunk_size);
        if bytes.len() as u64 != expected {
            return Err(FormatError::BadMemoryBlock("chunk length mismatch").into());
        }

        chunks[chunk_number as usize] = Some(bytes);
    }

    let mut data = Vec::with_capacity(length as usize);
    for chunk in chunks {
        // Numbers are unique and in range, so every slot got filled.
        data.append(&mut chunk.expect("all chunk slots filled"));
    }

    Ok(data)
}
