pub(crate) mod block;
pub(crate) mod node;

use self::node::{ArrayNode, ClassNode, Member, MemberType, Node, Value};
use crate::{stream::BinReader, FormatError, Result};
use linked_hash_map::LinkedHashMap;
use std::{collections::HashMap, io::Read, rc::Rc};

// MS-NRBF record tags. PDN files only ever carry this subset; the remaining
// legal tags (2, 3, 8, 15, 21, 22) are rejected rather than guessed at.
const SERIALIZED_STREAM_HEADER: u8 = 0;
const CLASS_WITH_ID: u8 = 1;
const SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES: u8 = 4;
const CLASS_WITH_MEMBERS_AND_TYPES: u8 = 5;
const BINARY_OBJECT_STRING: u8 = 6;
const BINARY_ARRAY: u8 = 7;
const MEMBER_REFERENCE: u8 = 9;
const OBJECT_NULL: u8 = 10;
const MESSAGE_END: u8 = 11;
const BINARY_LIBRARY: u8 = 12;
const OBJECT_NULL_MULTIPLE_256: u8 = 13;
const OBJECT_NULL_MULTIPLE: u8 = 14;
const ARRAY_SINGLE_OBJECT: u8 = 16;
const ARRAY_SINGLE_STRING: u8 = 17;

/// The class whose payload is carried out-of-band after `MessageEnd`.
pub(crate) const MEMORY_BLOCK: &str = "PaintDotNet.MemoryBlock";

/// The decoded object graph: every record that carried an `object_id`,
/// keyed by that id, plus the library table (informational only).
#[derive(Debug)]
pub(crate) struct ObjectGraph {
    pub(crate) objects: HashMap<i32, Node>,
    pub(crate) libraries: HashMap<i32, String>,
    pub(crate) root_id: i32,
}

/// Stateful NRBF record-stream interpreter.
///
/// One pass consumes the byte stream: the record loop runs until
/// `MessageEnd`, then the deferred `MemoryBlock` payloads that follow it are
/// reassembled, in the order the blocks were declared. The stream is never
/// seeked, so deferred decoding cannot be interleaved with the record loop.
pub(crate) struct Decoder<R>
where
    R: Read,
{
    reader: BinReader<R>,
    objects: HashMap<i32, Node>,
    libraries: HashMap<i32, String>,
    /// FIFO of `MemoryBlock` object ids whose payload follows `MessageEnd`.
    deferred: Vec<i32>,
    /// Null slots still owed by the last `ObjectNullMultiple*` record.
    pending_nulls: u64,
    root_id: Option<i32>,
}

impl<R> Decoder<R>
where
    R: Read,
{
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BinReader::new(reader),
            objects: HashMap::new(),
            libraries: HashMap::new(),
            deferred: Vec::new(),
            pending_nulls: 0,
            root_id: None,
        }
    }

    pub(crate) fn decode(mut self) -> Result<ObjectGraph> {
        if let Err(err) = self.run() {
            return Err(err.with_offset(self.reader.position()));
        }

        let root_id = self
            .root_id
            .ok_or(FormatError::Invalid("missing serialization header"))?;
        if !self.objects.contains_key(&root_id) {
            return Err(FormatError::DanglingReference(root_id).into());
        }

        Ok(ObjectGraph {
            objects: self.objects,
            libraries: self.libraries,
            root_id,
        })
    }

    fn run(&mut self) -> Result<()> {
        loop {
            if self.pending_nulls > 0 {
                self.pending_nulls -= 1;
                continue;
            }

            let tag = self.reader.read_record_tag()?;
            match tag {
                MESSAGE_END => break,
                SERIALIZED_STREAM_HEADER => self.read_header()?,
                BINARY_LIBRARY => self.read_library()?,
                _ => {
                    let _ = self.read_record(tag)?;
                }
            }
        }

        self.drain_deferred()
    }

    fn read_header(&mut self) -> Result<()> {
        let root_id = self.reader.read_u32()?;
        let _header_id = self.reader.read_u32()?;
        let _major_version = self.reader.read_u32()?;
        let _minor_version = self.reader.read_u32()?;

        self.root_id = Some(root_id as i32);
        Ok(())
    }

    fn read_library(&mut self) -> Result<()> {
        let library_id = self.reader.read_u32()?;
        let name = self.reader.read_string()?;

        self.libraries.insert(library_id as i32, name);
        Ok(())
    }

    /// Reads the next value slot.
    ///
    /// A pending null run yields a `Null` without touching the stream; the
    /// record tag is only consumed once the counter reaches zero. Library
    /// records may legally precede the value they announce types for.
    fn read_value(&mut self) -> Result<Value> {
        if self.pending_nulls > 0 {
            self.pending_nulls -= 1;
            return Ok(Value::Null);
        }

        loop {
            let tag = self.reader.read_record_tag()?;
            if tag == BINARY_LIBRARY {
                self.read_library()?;
                continue;
            }

            return self.read_record(tag);
        }
    }

    /// Dispatches one value-producing record.
    fn read_record(&mut self, tag: u8) -> Result<Value> {
        match tag {
            CLASS_WITH_ID => self.read_class_with_id(),
            SYSTEM_CLASS_WITH_MEMBERS_AND_TYPES => self.read_class(true),
            CLASS_WITH_MEMBERS_AND_TYPES => self.read_class(false),
            BINARY_OBJECT_STRING => {
                let object_id = self.reader.read_i32()?;
                let string = self.reader.read_string()?;

                self.register(object_id, Node::String(string))?;
                Ok(Value::Ref(object_id))
            }
            BINARY_ARRAY => self.read_binary_array(),
            MEMBER_REFERENCE => Ok(Value::Ref(self.reader.read_i32()?)),
            OBJECT_NULL => Ok(Value::Null),
            OBJECT_NULL_MULTIPLE_256 => {
                let count = u64::from(self.reader.read_u8()?);
                self.pending_nulls = count.saturating_sub(1);
                Ok(Value::Null)
            }
            OBJECT_NULL_MULTIPLE => {
                let count = u64::from(self.reader.read_u32()?);
                self.pending_nulls = count.saturating_sub(1);
                Ok(Value::Null)
            }
            ARRAY_SINGLE_OBJECT | ARRAY_SINGLE_STRING => self.read_array_single(),
            _ => Err(FormatError::UnsupportedRecord(tag).into()),
        }
    }

    fn read_class(&mut self, system: bool) -> Result<Value> {
        let object_id = self.reader.read_i32()?;
        let name = self.reader.read_string()?;
        let member_count = self.reader.read_u32()? as usize;

        let mut names = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            names.push(self.reader.read_string()?);
        }

        let mut codes = Vec::with_capacity(member_count);
        for _ in 0..member_count {
            codes.push(self.reader.read_u8()?);
        }

        // The extras follow as a block, in member order.
        let members = names
            .into_iter()
            .zip(codes)
            .map(|(name, code)| {
                Ok(Member {
                    ty: MemberType::read(code, &mut self.reader)?,
                    name,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let members: Rc<[Member]> = members.into();

        let library_id = if system {
            None
        } else {
            Some(self.reader.read_i32()?)
        };

        let values = self.read_members(&members)?;
        self.finish_class(
            object_id,
            ClassNode {
                name,
                library_id,
                members,
                values,
            },
        )
    }

    /// Reuses the member layout of an earlier class record; the two records
    /// share nothing else.
    fn read_class_with_id(&mut self) -> Result<Value> {
        let object_id = self.reader.read_i32()?;
        let metadata_id = self.reader.read_i32()?;

        let (name, library_id, members) = match self.objects.get(&metadata_id) {
            Some(Node::Class(class)) => (
                class.name.clone(),
                class.library_id,
                Rc::clone(&class.members),
            ),
            _ => return Err(FormatError::DanglingReference(metadata_id).into()),
        };

        let values = self.read_members(&members)?;
        self.finish_class(
            object_id,
            ClassNode {
                name,
                library_id,
                members,
                values,
            },
        )
    }

    fn read_members(&mut self, members: &[Member]) -> Result<LinkedHashMap<String, Value>> {
        let mut values = LinkedHashMap::with_capacity(members.len());
        for member in members {
            let value = self.read_member_value(&member.ty)?;
            values.insert(member.name.clone(), value);
        }

        Ok(values)
    }

    /// Primitive members are raw bytes; everything else is a nested record.
    fn read_member_value(&mut self, ty: &MemberType) -> Result<Value> {
        match ty {
            MemberType::Primitive(kind) => Ok(Value::Primitive(kind.read(&mut self.reader)?)),
            _ => self.read_value(),
        }
    }

    fn finish_class(&mut self, object_id: i32, class: ClassNode) -> Result<Value> {
        // MemoryBlock payloads follow MessageEnd, in declaration order.
        if class.name == MEMORY_BLOCK
            && class
                .values
                .get("deferred")
                .map_or(false, Value::is_truthy)
        {
            self.deferred.push(object_id);
        }

        self.register(object_id, Node::Class(class))?;
        Ok(Value::Ref(object_id))
    }

    fn read_binary_array(&mut self) -> Result<Value> {
        let object_id = self.reader.read_i32()?;
        let array_type = self.reader.read_u8()?;

        let rank = self.reader.read_i32()?;
        if rank < 0 {
            return Err(FormatError::Invalid("negative array rank").into());
        }

        let mut lengths = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            let length = self.reader.read_i32()?;
            if length < 0 {
                return Err(FormatError::Invalid("negative array length").into());
            }
            lengths.push(length as usize);
        }

        // Offset array kinds carry per-dimension lower bounds. PDN never
        // writes them; the values are consumed and dropped.
        if matches!(array_type, 3 | 4 | 5) {
            for _ in 0..rank {
                let _lower_bound = self.reader.read_i32()?;
            }
        }

        let code = self.reader.read_u8()?;
        let element = MemberType::read(code, &mut self.reader)?;

        let total = lengths
            .iter()
            .try_fold(1usize, |product, length| product.checked_mul(*length))
            .ok_or(FormatError::Invalid("array too large"))?;

        let mut values = Vec::with_capacity(total);
        for _ in 0..total {
            values.push(self.read_member_value(&element)?);
        }

        self.register(object_id, Node::Array(ArrayNode { lengths, values }))?;
        Ok(Value::Ref(object_id))
    }

    /// `ArraySingleObject` and `ArraySingleString`: every element is a
    /// nested record.
    fn read_array_single(&mut self) -> Result<Value> {
        let object_id = self.reader.read_i32()?;

        let length = self.reader.read_i32()?;
        if length < 0 {
            return Err(FormatError::Invalid("negative array length").into());
        }

        let mut values = Vec::with_capacity(length as usize);
        for _ in 0..length {
            values.push(self.read_value()?);
        }

        self.register(
            object_id,
            Node::Array(ArrayNode {
                lengths: vec![length as usize],
                values,
            }),
        )?;
        Ok(Value::Ref(object_id))
    }

    fn register(&mut self, object_id: i32, node: Node) -> Result<()> {
        if self.objects.contains_key(&object_id) {
            return Err(FormatError::DuplicateObjectId(object_id).into());
        }

        self.objects.insert(object_id, node);
        Ok(())
    }

    fn drain_deferred(&mut self) -> Result<()> {
        for object_id in std::mem::take(&mut self.deferred) {
            let length = match self.objects.get(&object_id) {
                Some(Node::Class(class)) => class
                    .values
                    .get("length64")
                    .and_then(|value| match value {
                        Value::Primitive(primitive) => primitive.as_u64(),
                        _ => None,
                    })
                    .ok_or(FormatError::BadMemoryBlock("missing length64"))?,
                _ => return Err(FormatError::DanglingReference(object_id).into()),
            };

            let data = block::read_chunked(&mut self.reader, length)?;

            if let Some(Node::Class(class)) = self.objects.get_mut(&object_id) {
                class.values.insert("data".into(), Value::Bytes(data));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoder, ObjectGraph};
    use crate::{
        nrbf::node::{Node, Primitive, Value},
        utils::pdn::Writer,
        Error, FormatError, Result,
    };

    fn decode(writer: Writer) -> Result<ObjectGraph> {
        Decoder::new(std::io::Cursor::new(writer.into_bytes())).decode()
    }

    fn class<'g>(graph: &'g ObjectGraph, id: i32) -> &'g super::ClassNode {
        match graph.objects.get(&id) {
            Some(Node::Class(class)) => class,
            other => panic!("expected a class node at id {id}, got {other:?}"),
        }
    }

    fn array<'g>(graph: &'g ObjectGraph, id: i32) -> &'g super::ArrayNode {
        match graph.objects.get(&id) {
            Some(Node::Array(array)) => array,
            other => panic!("expected an array node at id {id}, got {other:?}"),
        }
    }

    /// Header pointing at `root_id`, plus a library so the table is
    /// populated.
    fn preamble(root_id: u32) -> Writer {
        let mut w = Writer::default();
        w.u8(0).u32(root_id).u32(2).u32(1).u32(0);
        w.u8(12).u32(2).str("PaintDotNet, Version=3.36.0.0");
        w
    }

    #[test]
    fn libraries_are_recorded() -> Result<()> {
        let mut w = preamble(1);
        w.u8(6).i32(1).str("root");
        w.u8(11);

        let graph = decode(w)?;

        assert_eq!(
            graph.libraries.get(&2).map(String::as_str),
            Some("PaintDotNet, Version=3.36.0.0")
        );
        assert_eq!(graph.root_id, 1);

        Ok(())
    }

    #[test]
    fn class_layout_reuse_works() -> Result<()> {
        let mut w = preamble(1);
        // ClassWithMembersAndTypes: one Int32 member.
        w.u8(5)
            .i32(1)
            .str("Thing")
            .u32(1)
            .str("a")
            .u8(0)
            .u8(8)
            .i32(2)
            .i32(7);
        // ClassWithId reusing the layout of id 1.
        w.u8(1).i32(2).i32(1).i32(9);
        w.u8(11);

        let graph = decode(w)?;

        let first = class(&graph, 1);
        let second = class(&graph, 2);
        assert_eq!(first.name, "Thing");
        assert_eq!(second.name, "Thing");
        assert_eq!(second.library_id, Some(2));
        assert_eq!(
            first.values.get("a"),
            Some(&Value::Primitive(Primitive::I32(7)))
        );
        assert_eq!(
            second.values.get("a"),
            Some(&Value::Primitive(Primitive::I32(9)))
        );

        Ok(())
    }

    #[test]
    fn null_run_fills_array_slots_without_consuming_tags() -> Result<()> {
        let mut w = preamble(1);
        // Five-slot object array: one string, then ObjectNullMultiple256
        // covering the remaining four slots. Nothing else precedes the
        // MessageEnd, so any extra tag read would hit it and fail.
        w.u8(16).i32(1).i32(5);
        w.u8(6).i32(9).str("x");
        w.u8(13).u8(4);
        w.u8(11);

        let graph = decode(w)?;

        let array = array(&graph, 1);
        assert_eq!(array.lengths, [5]);
        assert_eq!(
            array.values,
            [
                Value::Ref(9),
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null
            ]
        );

        Ok(())
    }

    #[test]
    fn null_multiple_with_count_one_equals_object_null() -> Result<()> {
        let mut w = preamble(1);
        w.u8(16).i32(1).i32(2);
        w.u8(13).u8(1);
        w.u8(10);
        w.u8(11);

        let graph = decode(w)?;

        assert_eq!(array(&graph, 1).values, [Value::Null, Value::Null]);

        Ok(())
    }

    #[test]
    fn string_array_elements_are_nested_records() -> Result<()> {
        let mut w = preamble(1);
        w.u8(17).i32(1).i32(2);
        w.u8(6).i32(5).str("first");
        w.u8(6).i32(6).str("second");
        w.u8(11);

        let graph = decode(w)?;

        assert_eq!(array(&graph, 1).values, [Value::Ref(5), Value::Ref(6)]);
        assert!(matches!(
            graph.objects.get(&5),
            Some(Node::String(s)) if s == "first"
        ));

        Ok(())
    }

    #[test]
    fn binary_array_stores_row_major_elements() -> Result<()> {
        let mut w = preamble(1);
        // Rectangular 2x3 array of Int32 primitives (array type 2).
        w.u8(7).i32(1).u8(2).i32(2).i32(2).i32(3).u8(0).u8(8);
        for n in 0..6 {
            w.i32(n);
        }
        w.u8(11);

        let graph = decode(w)?;

        let array = array(&graph, 1);
        assert_eq!(array.lengths, [2, 3]);
        assert_eq!(array.values.len(), 6);
        assert_eq!(array.values[4], Value::Primitive(Primitive::I32(4)));

        Ok(())
    }

    #[test]
    fn duplicate_object_id_is_rejected() {
        let mut w = preamble(1);
        w.u8(6).i32(1).str("first");
        w.u8(6).i32(1).str("second");
        w.u8(11);

        let err = decode(w).unwrap_err();

        assert!(matches!(
            err,
            Error::Format {
                err: FormatError::DuplicateObjectId(1),
                ..
            }
        ));
    }

    #[test]
    fn unsupported_record_is_rejected() {
        let mut w = preamble(1);
        w.u8(8);

        let err = decode(w).unwrap_err();

        assert!(matches!(
            err,
            Error::Format {
                err: FormatError::UnsupportedRecord(8),
                offset: Some(_),
            }
        ));
    }

    #[test]
    fn missing_root_is_rejected() {
        let mut w = preamble(42);
        w.u8(6).i32(1).str("not the root");
        w.u8(11);

        let err = decode(w).unwrap_err();

        assert!(matches!(
            err,
            Error::Format {
                err: FormatError::DanglingReference(42),
                ..
            }
        ));
    }

    #[test]
    fn deferred_block_payload_follows_message_end() -> Result<()> {
        let mut w = preamble(1);
        // A MemoryBlock with length64 = 6 and the deferred flag set.
        w.u8(5)
            .i32(1)
            .str(super::MEMORY_BLOCK)
            .u32(2)
            .str("length64")
            .str("deferred")
            .u8(0)
            .u8(0)
            .u8(9)
            .u8(1)
            .i32(2)
            .i64(6)
            .u8(1);
        w.u8(11);
        // Chunked payload: plain, chunk size 4, chunks 0 and 1.
        w.u8(1).be_u32(4);
        w.be_u32(0).be_u32(4).bytes(b"abcd");
        w.be_u32(1).be_u32(2).bytes(b"ef");

        let graph = decode(w)?;

        assert_eq!(
            class(&graph, 1).values.get("data"),
            Some(&Value::Bytes(b"abcdef".to_vec()))
        );

        Ok(())
    }
}
