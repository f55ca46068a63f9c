use super::{
    layer::{Layer, Surface},
    property::{PropertyBag, PropertyValue},
    Document, FormatError, Result,
};
use crate::nrbf::{
    node::{ArrayNode, ClassNode, Node, Primitive, Value},
    ObjectGraph, MEMORY_BLOCK,
};
use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

// Serialized class names with a dedicated mapping; every other class
// surfaces as an opaque property bag. The registry is closed: nothing is
// dispatched at runtime beyond this match.
const DOCUMENT: &str = "PaintDotNet.Document";
const LAYER_LIST: &str = "PaintDotNet.LayerList";
const BITMAP_LAYER: &str = "PaintDotNet.BitmapLayer";
const SURFACE: &str = "PaintDotNet.Surface";
const NAME_VALUE_COLLECTION: &str = "System.Collections.Specialized.NameValueCollection";
const ARRAY_LIST: &str = "System.Collections.ArrayList";

pub(crate) fn document(graph: &mut ObjectGraph) -> Result<Document> {
    let root_id = graph.root_id;
    Materializer::new(graph).document(root_id)
}

/// Walks the object table once, translating nodes into the public model.
///
/// The graph is taken mutably so bulk pixel payloads can be moved out of
/// their `MemoryBlock` nodes instead of copied; the table is discarded right
/// after materialization anyway.
struct Materializer<'a> {
    graph: &'a mut ObjectGraph,
    /// Nodes already materialized; back-references share the instance.
    built: HashMap<i32, PropertyValue>,
    /// Nodes currently materializing, to reject reference cycles.
    in_flight: HashSet<i32>,
}

impl<'a> Materializer<'a> {
    fn new(graph: &'a mut ObjectGraph) -> Self {
        Self {
            graph,
            built: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    fn document(&mut self, id: i32) -> Result<Document> {
        let class = self.class(id)?;
        if class.name != DOCUMENT {
            return Err(FormatError::Invalid("root object is not a document").into());
        }

        let width = member_u32(class, "width")?;
        let height = member_u32(class, "height")?;
        let layers = member(class, "layers")?.clone();

        let layers = self.layer_list(&layers)?;

        Ok(Document {
            width,
            height,
            layers,
            header_xml: None,
        })
    }

    fn layer_list(&mut self, value: &Value) -> Result<Vec<Layer>> {
        let id = expect_ref(value)?;
        let class = self.class(id)?;
        if class.name != LAYER_LIST {
            return Err(FormatError::Invalid("layers member is not a layer list").into());
        }

        let items = member(class, "ArrayList+_items")?.clone();
        let size = member_usize(class, "ArrayList+_size")?;

        let elements = self.array_elements(&items)?;
        elements
            .iter()
            .take(size)
            .map(|element| self.bitmap_layer(element))
            .collect()
    }

    fn bitmap_layer(&mut self, value: &Value) -> Result<Layer> {
        let id = expect_ref(value)?;
        let class = self.class(id)?;
        if class.name != BITMAP_LAYER {
            return Err(FormatError::Invalid("layer element is not a bitmap layer").into());
        }

        let width = member_u32(class, "Layer+width")?;
        let height = member_u32(class, "Layer+height")?;
        let layer_properties = member(class, "Layer+properties")?.clone();
        let surface = member(class, "surface")?.clone();
        let properties = member(class, "properties")?.clone();

        Ok(Layer {
            width,
            height,
            surface: self.surface(&surface)?,
            layer_properties: self.bag(&layer_properties)?,
            properties: self.bag(&properties)?,
        })
    }

    fn surface(&mut self, value: &Value) -> Result<Surface> {
        let id = expect_ref(value)?;
        let class = self.class(id)?;
        if class.name != SURFACE {
            return Err(FormatError::Invalid("surface member is not a surface").into());
        }

        let width = member_u32(class, "width")?;
        let height = member_u32(class, "height")?;
        let stride = member_u32(class, "stride")?;
        let scan0 = member(class, "scan0")?.clone();

        let data = self.take_block_data(&scan0)?;

        let row_bytes = width
            .checked_mul(4)
            .ok_or(FormatError::Invalid("surface too wide"))?;
        if stride < row_bytes {
            return Err(FormatError::Invalid("stride smaller than a packed row").into());
        }
        if data.len() as u64 != u64::from(stride) * u64::from(height) {
            return Err(FormatError::Invalid("surface data length mismatch").into());
        }

        Ok(Surface {
            width,
            height,
            stride,
            data,
        })
    }

    /// Takes the reassembled bytes out of a `MemoryBlock` node. Pixel
    /// buffers dominate memory use; they are moved, never copied.
    fn take_block_data(&mut self, value: &Value) -> Result<Vec<u8>> {
        let id = expect_ref(value)?;

        match self.graph.objects.get_mut(&id) {
            Some(Node::Class(class)) if class.name == MEMORY_BLOCK => {
                match class.values.get_mut("data") {
                    Some(Value::Bytes(bytes)) => Ok(std::mem::take(bytes)),
                    _ => Err(FormatError::BadMemoryBlock("no decoded payload").into()),
                }
            }
            Some(_) => Err(FormatError::Invalid("scan0 is not a memory block").into()),
            None => Err(FormatError::DanglingReference(id).into()),
        }
    }

    fn bag(&mut self, value: &Value) -> Result<Rc<PropertyBag>> {
        match self.value(value)? {
            PropertyValue::Bag(bag) => Ok(bag),
            _ => Err(FormatError::Invalid("expected a property object").into()),
        }
    }

    fn value(&mut self, value: &Value) -> Result<PropertyValue> {
        Ok(match value {
            Value::Null => PropertyValue::Null,
            Value::Primitive(primitive) => primitive_value(*primitive),
            Value::Bytes(bytes) => PropertyValue::Bytes(Rc::from(bytes.as_slice())),
            Value::Ref(id) => self.node(*id)?,
        })
    }

    /// Materializes the node behind `id`, memoized so shared subgraphs
    /// resolve to the same instance.
    fn node(&mut self, id: i32) -> Result<PropertyValue> {
        if let Some(done) = self.built.get(&id) {
            return Ok(done.clone());
        }
        if !self.in_flight.insert(id) {
            return Err(FormatError::CircularReference(id).into());
        }

        let result = self.build_node(id);

        self.in_flight.remove(&id);
        if let Ok(ref value) = result {
            self.built.insert(id, value.clone());
        }

        result
    }

    fn build_node(&mut self, id: i32) -> Result<PropertyValue> {
        match self.graph.objects.get(&id) {
            None => Err(FormatError::DanglingReference(id).into()),
            Some(Node::String(string)) => Ok(PropertyValue::String(Rc::from(string.as_str()))),
            Some(Node::Array(array)) => {
                // Element values are scalars and references; cloning the
                // shell frees the graph borrow for the recursion below.
                let array = array.clone();
                self.array(&array)
            }
            Some(Node::Class(class)) => {
                let class = class.clone();
                self.class_value(&class)
            }
        }
    }

    fn array(&mut self, array: &ArrayNode) -> Result<PropertyValue> {
        let values = array
            .values
            .iter()
            .map(|value| self.value(value))
            .collect::<Result<Vec<_>>>()?;

        Ok(nest(&array.lengths, &values))
    }

    fn class_value(&mut self, class: &ClassNode) -> Result<PropertyValue> {
        match class.name.as_str() {
            NAME_VALUE_COLLECTION => self.name_value_collection(class),
            ARRAY_LIST => self.array_list(class),
            _ => self.opaque_bag(class),
        }
    }

    /// Zips `Keys` and `Values` element-wise into a string-keyed bag.
    fn name_value_collection(&mut self, class: &ClassNode) -> Result<PropertyValue> {
        let keys = self.list_member(class, "Keys")?;
        let values = self.list_member(class, "Values")?;

        let mut bag = PropertyBag::new(None);
        for (key, value) in keys.iter().zip(values.iter()) {
            let key = key
                .as_str()
                .ok_or(FormatError::Invalid("collection key is not a string"))?;
            bag.insert(key.to_owned(), value.clone());
        }

        Ok(PropertyValue::Bag(Rc::new(bag)))
    }

    /// `_items` truncated to `_size`.
    fn array_list(&mut self, class: &ClassNode) -> Result<PropertyValue> {
        let size = member_usize(class, "_size")?;
        let items = self.list_member(class, "_items")?;

        let truncated: Vec<_> = items.iter().take(size).cloned().collect();
        Ok(PropertyValue::List(truncated.into()))
    }

    fn opaque_bag(&mut self, class: &ClassNode) -> Result<PropertyValue> {
        let mut bag = PropertyBag::new(Some(class.name.clone()));
        for (name, value) in class.values.iter() {
            let value = self.value(value)?;
            bag.insert(name.clone(), value);
        }

        Ok(PropertyValue::Bag(Rc::new(bag)))
    }

    fn list_member(&mut self, class: &ClassNode, name: &'static str) -> Result<Rc<[PropertyValue]>> {
        let value = member(class, name)?.clone();

        match self.value(&value)? {
            PropertyValue::List(list) => Ok(list),
            _ => Err(FormatError::Invalid("expected a list member").into()),
        }
    }

    fn class(&self, id: i32) -> Result<&ClassNode> {
        match self.graph.objects.get(&id) {
            Some(Node::Class(class)) => Ok(class),
            Some(_) => Err(FormatError::Invalid("expected a class record").into()),
            None => Err(FormatError::DanglingReference(id).into()),
        }
    }

    fn array_elements(&self, value: &Value) -> Result<Vec<Value>> {
        let id = expect_ref(value)?;

        match self.graph.objects.get(&id) {
            Some(Node::Array(array)) => Ok(array.values.clone()),
            Some(_) => Err(FormatError::Invalid("expected an array record").into()),
            None => Err(FormatError::DanglingReference(id).into()),
        }
    }
}

/// Rebuilds the nested list shape of a multi-rank array from its row-major
/// elements; rank-1 arrays stay flat.
fn nest(lengths: &[usize], values: &[PropertyValue]) -> PropertyValue {
    if lengths.len() <= 1 {
        return PropertyValue::List(values.to_vec().into());
    }

    let inner: usize = lengths[1..].iter().product();
    let lists: Vec<PropertyValue> = if inner == 0 {
        (0..lengths[0]).map(|_| nest(&lengths[1..], &[])).collect()
    } else {
        values
            .chunks(inner)
            .map(|chunk| nest(&lengths[1..], chunk))
            .collect()
    };

    PropertyValue::List(lists.into())
}

fn primitive_value(primitive: Primitive) -> PropertyValue {
    match primitive {
        Primitive::Bool(value) => PropertyValue::Bool(value),
        Primitive::U8(value) => PropertyValue::Int(value as i64),
        Primitive::I8(value) => PropertyValue::Int(value as i64),
        Primitive::I16(value) => PropertyValue::Int(value as i64),
        Primitive::I32(value) => PropertyValue::Int(value as i64),
        Primitive::I64(value) => PropertyValue::Int(value),
        Primitive::U16(value) => PropertyValue::Int(value as i64),
        Primitive::U32(value) => PropertyValue::Int(value as i64),
        Primitive::U64(value) => PropertyValue::UInt(value),
        Primitive::F32(value) => PropertyValue::Float(value as f64),
        Primitive::F64(value) => PropertyValue::Float(value),
    }
}

fn expect_ref(value: &Value) -> Result<i32> {
    match value {
        Value::Ref(id) => Ok(*id),
        _ => Err(FormatError::Invalid("expected an object reference").into()),
    }
}

fn member<'c>(class: &'c ClassNode, name: &'static str) -> Result<&'c Value> {
    class
        .values
        .get(name)
        .ok_or_else(|| FormatError::MissingMember(name).into())
}

fn member_u32(class: &ClassNode, name: &'static str) -> Result<u32> {
    match member(class, name)? {
        Value::Primitive(primitive) => primitive
            .as_u32()
            .ok_or_else(|| FormatError::Invalid("member is not a valid dimension").into()),
        _ => Err(FormatError::Invalid("expected a numeric member").into()),
    }
}

fn member_usize(class: &ClassNode, name: &'static str) -> Result<usize> {
    match member(class, name)? {
        Value::Primitive(primitive) => primitive
            .as_usize()
            .ok_or_else(|| FormatError::Invalid("member is not a valid count").into()),
        _ => Err(FormatError::Invalid("expected a numeric member").into()),
    }
}
