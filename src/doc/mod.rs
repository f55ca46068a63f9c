pub mod layer;
pub mod property;

pub(crate) mod materialize;

pub use self::layer::{Layer, Surface};
pub use self::property::{PropertyBag, PropertyValue};

use crate::{envelope::Envelope, nrbf::Decoder};
use std::{
    fmt::{Display, Formatter},
    fs::File,
    io::{self, BufReader, Cursor, Read},
    path::Path,
};

// TODO: serde feature.

pub type Result<T> = std::result::Result<T, Error>;

/// Any failure is fatal to the parse; the reader never yields a partial
/// document.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Format {
        err: FormatError,
        /// Bytes consumed from the decompressed payload when the fault was
        /// detected, when known.
        offset: Option<u64>,
    },
}

#[derive(Debug)]
pub enum FormatError {
    /// File magic or inner flag invalid.
    BadEnvelope,
    /// A legal NRBF record tag outside the subset PDN files use.
    UnsupportedRecord(u8),
    /// A 7-bit length prefix ran past five bytes.
    BadVarint,
    BadUtf8,
    DuplicateObjectId(i32),
    DanglingReference(i32),
    /// A back-reference into an object that is still being materialized.
    CircularReference(i32),
    BadMemoryBlock(&'static str),
    /// Unrecognized primitive type id.
    BadPrimitive(u8),
    /// Unrecognized member type code.
    BadTypeInfo(u8),
    MissingMember(&'static str),
    Invalid(&'static str),
}

impl Error {
    /// Attaches a stream offset to a format error that has none yet.
    pub(crate) fn with_offset(self, offset: u64) -> Self {
        match self {
            Error::Format { err, offset: None } => Error::Format {
                err,
                offset: Some(offset),
            },
            other => other,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(io) => write!(f, "{io}"),
            Error::Format {
                err,
                offset: Some(offset),
            } => write!(f, "{err} (at stream offset {offset:#x})"),
            Error::Format { err, offset: None } => write!(f, "{err}"),
        }
    }
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use FormatError as E;

        match self {
            E::BadEnvelope => write!(f, "not a pdn file: bad magic or inner flag"),
            E::UnsupportedRecord(tag) => write!(f, "unsupported record tag '{tag}'"),
            E::BadVarint => write!(f, "string length prefix is too long"),
            E::BadUtf8 => write!(f, "string is not valid UTF-8"),
            E::DuplicateObjectId(id) => write!(f, "object id '{id}' was assigned twice"),
            E::DanglingReference(id) => write!(f, "reference to unknown object id '{id}'"),
            E::CircularReference(id) => write!(f, "object id '{id}' references itself"),
            E::BadMemoryBlock(reason) => write!(f, "bad memory block: {reason}"),
            E::BadPrimitive(id) => write!(f, "unknown primitive type id '{id}'"),
            E::BadTypeInfo(code) => write!(f, "unknown member type code '{code}'"),
            E::MissingMember(name) => write!(f, "'{name}' member is missing"),
            E::Invalid(reason) => write!(f, "invalid/corrupted pdn file: {reason}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Self {
        Error::Format { err, offset: None }
    }
}

impl std::error::Error for Error {}

/// The root object of a parsed PDN file; owns every layer, surface and
/// property bag decoded from it.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Width of the canvas.
    pub width: u32,
    /// Height of the canvas.
    pub height: u32,
    /// Layers ordered from bottom to top.
    pub layers: Vec<Layer>,
    /// The XML document header of PDN 2.1+ files; legacy gzipped files have
    /// none.
    pub header_xml: Option<String>,
}

impl Document {
    /// Reads a PDN document from a file.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pdnre::{Document, Result};
    ///
    /// fn main() -> Result<()> {
    ///     let doc = Document::from_path("my_image.pdn")?;
    ///     println!("{}x{}", doc.width, doc.height);
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Reads a PDN document from an in-memory buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }

    /// Reads a PDN document from a byte stream.
    ///
    /// The stream is consumed sequentially and exactly once; it does not
    /// need to be seekable.
    pub fn from_reader<R>(reader: R) -> Result<Self>
    where
        R: Read,
    {
        let Envelope { header_xml, body } = Envelope::open(reader)?;
        let mut graph = Decoder::new(body).decode()?;

        let mut document = materialize::document(&mut graph)?;
        document.header_xml = header_xml;

        Ok(document)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}x{}, {} layer(s)", self.width, self.height, self.layers.len())?;

        for (index, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  {index}: {}", layer.name().unwrap_or("<unnamed>"))?;
        }

        Ok(())
    }
}
