use crate::{stream::BinReader, FormatError, Result};
use linked_hash_map::LinkedHashMap;
use std::{io, io::Read, rc::Rc};

/// A decoded record that owns a slot in the object table.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Class(ClassNode),
    String(String),
    Array(ArrayNode),
}

#[derive(Clone, Debug)]
pub(crate) struct ClassNode {
    pub(crate) name: String,
    pub(crate) library_id: Option<i32>,
    /// Member layout; `ClassWithId` records reuse it without copying.
    pub(crate) members: Rc<[Member]>,
    /// Member values in declaration order. The deferred `MemoryBlock`
    /// decoder inserts a `data` entry that is not a declared member.
    pub(crate) values: LinkedHashMap<String, Value>,
}

#[derive(Clone, Debug)]
pub(crate) struct Member {
    pub(crate) name: String,
    pub(crate) ty: MemberType,
}

/// Elements in row-major order, innermost dimension fastest; `lengths` has
/// one entry per rank.
#[derive(Clone, Debug)]
pub(crate) struct ArrayNode {
    pub(crate) lengths: Vec<usize>,
    pub(crate) values: Vec<Value>,
}

/// A value slot inside a class member or an array element.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Null,
    Primitive(Primitive),
    /// Late-bound reference into the object table.
    Ref(i32),
    /// Raw bytes reassembled by the deferred `MemoryBlock` decoder.
    Bytes(Vec<u8>),
}

impl Value {
    /// A set bool or a non-zero number; how the `deferred` flag is checked.
    pub(crate) fn is_truthy(&self) -> bool {
        match self {
            Value::Primitive(primitive) => primitive.is_truthy(),
            _ => false,
        }
    }
}

/// The wire type of one class member, with the "extra" payload its type code
/// carries already consumed.
///
/// Class names attached to codes 3 and 4 only distinguish system from user
/// types on the wire; they are validated and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MemberType {
    Primitive(PrimitiveKind),
    Object,
    String,
    SystemClass,
    Class,
    ObjectArray,
    StringArray,
    PrimitiveArray(PrimitiveKind),
}

impl MemberType {
    pub(crate) fn read<R>(code: u8, reader: &mut BinReader<R>) -> Result<Self>
    where
        R: Read,
    {
        Ok(match code {
            0 => Self::Primitive(PrimitiveKind::new(reader.read_u8()?)?),
            1 => Self::Object,
            2 => Self::String,
            3 => {
                let _class_name = reader.read_string()?;
                Self::SystemClass
            }
            4 => {
                let _class_name = reader.read_string()?;
                let _library_id = reader.read_i32()?;
                Self::Class
            }
            5 => Self::ObjectArray,
            6 => Self::StringArray,
            7 => Self::PrimitiveArray(PrimitiveKind::new(reader.read_u8()?)?),
            _ => return Err(FormatError::BadTypeInfo(code).into()),
        })
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PrimitiveKind {
    Bool = 1,
    Byte = 2,
    Double = 6,
    Int16 = 7,
    Int32 = 8,
    Int64 = 9,
    SByte = 10,
    Single = 11,
    UInt16 = 14,
    UInt32 = 15,
    UInt64 = 16,
}

impl PrimitiveKind {
    pub(crate) fn new(value: u8) -> Result<Self> {
        Ok(match value {
            1 => Self::Bool,
            2 => Self::Byte,
            6 => Self::Double,
            7 => Self::Int16,
            8 => Self::Int32,
            9 => Self::Int64,
            10 => Self::SByte,
            11 => Self::Single,
            14 => Self::UInt16,
            15 => Self::UInt32,
            16 => Self::UInt64,
            _ => return Err(FormatError::BadPrimitive(value).into()),
        })
    }

    pub(crate) fn read<R>(self, reader: &mut BinReader<R>) -> io::Result<Primitive>
    where
        R: Read,
    {
        Ok(match self {
            Self::Bool => Primitive::Bool(reader.read_bool()?),
            Self::Byte => Primitive::U8(reader.read_u8()?),
            Self::Double => Primitive::F64(reader.read_f64()?),
            Self::Int16 => Primitive::I16(reader.read_i16()?),
            Self::Int32 => Primitive::I32(reader.read_i32()?),
            Self::Int64 => Primitive::I64(reader.read_i64()?),
            Self::SByte => Primitive::I8(reader.read_i8()?),
            Self::Single => Primitive::F32(reader.read_f32()?),
            Self::UInt16 => Primitive::U16(reader.read_u16()?),
            Self::UInt32 => Primitive::U32(reader.read_u32()?),
            Self::UInt64 => Primitive::U64(reader.read_u64()?),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Primitive {
    Bool(bool),
    U8(u8),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Primitive {
    pub(crate) fn is_truthy(self) -> bool {
        match self {
            Primitive::Bool(value) => value,
            Primitive::U8(value) => value != 0,
            Primitive::I8(value) => value != 0,
            Primitive::I16(value) => value != 0,
            Primitive::I32(value) => value != 0,
            Primitive::I64(value) => value != 0,
            Primitive::U16(value) => value != 0,
            Primitive::U32(value) => value != 0,
            Primitive::U64(value) => value != 0,
            Primitive::F32(_) | Primitive::F64(_) => false,
        }
    }

    pub(crate) fn as_u64(self) -> Option<u64> {
        match self {
            Primitive::U8(value) => Some(value as u64),
            Primitive::U16(value) => Some(value as u64),
            Primitive::U32(value) => Some(value as u64),
            Primitive::U64(value) => Some(value),
            Primitive::I8(value) => u64::try_from(value).ok(),
            Primitive::I16(value) => u64::try_from(value).ok(),
            Primitive::I32(value) => u64::try_from(value).ok(),
            Primitive::I64(value) => u64::try_from(value).ok(),
            _ => None,
        }
    }

    pub(crate) fn as_u32(self) -> Option<u32> {
        self.as_u64().and_then(|value| u32::try_from(value).ok())
    }

    pub(crate) fn as_usize(self) -> Option<usize> {
        self.as_u64().and_then(|value| usize::try_from(value).ok())
    }
}
