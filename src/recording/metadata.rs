use ahash::AHashMap;

use super::io::ByteReader;
use crate::error::Result;

/// Record type of the metadata record.
pub(crate) const METADATA_RECORD: u64 = 0;
/// Record type of a constant pool record.
pub(crate) const CONSTANT_POOL_RECORD: u64 = 1;

/// Super type that marks a type as an event type.
pub const EVENT_SUPER_TYPE: &str = "jdk.jfr.Event";

/// Nesting limit of the metadata element tree; real trees are four levels deep.
const MAX_ELEMENT_DEPTH: usize = 16;

/// Built-in value kinds that are decoded directly rather than field by field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
}

impl Primitive {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => Primitive::Boolean,
            "byte" => Primitive::Byte,
            "char" => Primitive::Char,
            "short" => Primitive::Short,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "java.lang.String" => Primitive::String,
            _ => return None,
        })
    }
}

/// One field of a described type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDesc {
    /// Field name, e.g. `stackTrace`.
    pub name: String,
    /// Id of the field's type.
    pub type_id: u64,
    /// The field holds a constant pool key instead of an inline value.
    pub constant_pool: bool,
    /// The field is a one-dimensional array.
    pub array: bool,
}

/// A type described by a chunk's metadata record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDesc {
    /// Id used by records and fields to refer to this type.
    pub id: u64,
    /// Fully qualified type name, e.g. `jdk.ExecutionSample`.
    pub name: String,
    /// Name of the super type, `jdk.jfr.Event` for event types.
    pub super_type: Option<String>,
    /// Fields in encoding order.
    pub fields: Vec<FieldDesc>,
    pub(crate) primitive: Option<Primitive>,
}

impl TypeDesc {
    /// Whether records of this type are events.
    pub fn is_event(&self) -> bool {
        self.super_type.as_deref() == Some(EVENT_SUPER_TYPE)
    }

    /// Position of the named field in [`TypeDesc::fields`].
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// The type table of one chunk.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    types: AHashMap<u64, TypeDesc>,
    by_name: AHashMap<String, u64>,
}

impl Metadata {
    /// Parses the payload of a metadata record; `reader` is positioned just after the record's
    /// type id.
    ///
    /// The payload is a string table followed by a tree of elements whose names and attributes
    /// index into the table. Types are the `class` children of `metadata` below the root, with
    /// their `field` children in encoding order. Annotations, settings and the `region` element
    /// are skipped.
    pub(crate) fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        let _start = reader.long()?;
        let _duration = reader.long()?;
        let _id = reader.long()?;

        let nstrings = reader.count()?;
        let mut strings = Vec::with_capacity(nstrings);
        for _ in 0..nstrings {
            strings.push(reader.inline_string()?.unwrap_or_default());
        }
        let root = Element::parse(reader, &strings, 0)?;

        let mut metadata = Metadata::default();
        for class in root
            .children_named("metadata")
            .flat_map(|m| m.children_named("class"))
        {
            metadata.insert(class_desc(reader, class)?);
        }
        Ok(metadata)
    }

    pub(crate) fn insert(&mut self, desc: TypeDesc) {
        self.by_name.insert(desc.name.clone(), desc.id);
        self.types.insert(desc.id, desc);
    }

    /// Looks up a type by id.
    pub fn get(&self, id: u64) -> Option<&TypeDesc> {
        self.types.get(&id)
    }

    /// Looks up a type by name.
    pub fn by_name(&self, name: &str) -> Option<&TypeDesc> {
        self.by_name.get(name).and_then(|id| self.types.get(id))
    }

    /// All described event types, in no particular order.
    pub fn event_types(&self) -> impl Iterator<Item = &TypeDesc> {
        self.types.values().filter(|t| t.is_event())
    }

    /// Number of described types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are described.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// One node of the metadata element tree.
#[derive(Debug)]
struct Element<'s> {
    name: &'s str,
    attributes: Vec<(&'s str, &'s str)>,
    children: Vec<Element<'s>>,
}

impl<'s> Element<'s> {
    fn parse(reader: &mut ByteReader<'_>, strings: &'s [String], depth: usize) -> Result<Self> {
        if depth > MAX_ELEMENT_DEPTH {
            return Err(reader.error("metadata elements nest too deeply"));
        }
        let string = |reader: &mut ByteReader<'_>| -> Result<&'s str> {
            let index = reader.int()?;
            usize::try_from(index)
                .ok()
                .and_then(|i| strings.get(i))
                .map(String::as_str)
                .ok_or_else(|| reader.error(format!("string index {} out of range", index)))
        };

        let name = string(reader)?;
        let nattributes = reader.count()?;
        let mut attributes = Vec::with_capacity(nattributes);
        for _ in 0..nattributes {
            let key = string(reader)?;
            let value = string(reader)?;
            attributes.push((key, value));
        }
        let nchildren = reader.count()?;
        let mut children = Vec::with_capacity(nchildren);
        for _ in 0..nchildren {
            children.push(Element::parse(reader, strings, depth + 1)?);
        }
        Ok(Element {
            name,
            attributes,
            children,
        })
    }

    fn attribute(&self, key: &str) -> Option<&'s str> {
        self.attributes
            .iter()
            .find(|&&(k, _)| k == key)
            .map(|&(_, v)| v)
    }

    fn children_named<'e>(&'e self, name: &'e str) -> impl Iterator<Item = &'e Element<'s>> + 'e {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn type_id(reader: &ByteReader<'_>, element: &Element<'_>, key: &str) -> Result<u64> {
    let value = element
        .attribute(key)
        .ok_or_else(|| reader.error(format!("metadata {} without {}", element.name, key)))?;
    value
        .parse()
        .map_err(|_| reader.error(format!("metadata {} has bad {} {:?}", element.name, key, value)))
}

fn class_desc(reader: &ByteReader<'_>, class: &Element<'_>) -> Result<TypeDesc> {
    let id = type_id(reader, class, "id")?;
    if id == METADATA_RECORD || id == CONSTANT_POOL_RECORD {
        return Err(reader.error(format!("class uses reserved id {}", id)));
    }
    let name = class
        .attribute("name")
        .ok_or_else(|| reader.error("metadata class without a name"))?;

    let mut fields = Vec::new();
    for field in class.children_named("field") {
        let field_name = field
            .attribute("name")
            .ok_or_else(|| reader.error(format!("field of {} without a name", name)))?;
        let array = match field.attribute("dimension") {
            None | Some("0") => false,
            Some("1") => true,
            Some(d) => {
                return Err(reader.error(format!(
                    "unsupported array dimension {} of {}.{}",
                    d, name, field_name
                )))
            }
        };
        fields.push(FieldDesc {
            name: field_name.to_owned(),
            type_id: type_id(reader, field, "class")?,
            constant_pool: field.attribute("constantPool") == Some("true"),
            array,
        });
    }

    Ok(type_desc(id, name, class.attribute("superType"), fields))
}

/// Builds a [`TypeDesc`].
pub(crate) fn type_desc(id: u64, name: &str, super_type: Option<&str>, fields: Vec<FieldDesc>) -> TypeDesc {
    TypeDesc {
        id,
        name: name.to_owned(),
        super_type: super_type.map(str::to_owned),
        fields,
        primitive: Primitive::from_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::io::ByteWriter;
    use crate::recording::ByteOrder;

    fn record(strings: &[&str], tree: impl FnOnce(&mut ByteWriter)) -> Vec<u8> {
        let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
        w.long(0);
        w.long(0);
        w.long(1);
        w.int(strings.len() as i32);
        for s in strings {
            w.string(Some(s));
        }
        tree(&mut w);
        w.into_inner()
    }

    /// Writes an element header; its `children` follow.
    fn element(w: &mut ByteWriter, name: i32, attributes: &[(i32, i32)], children: i32) {
        w.int(name);
        w.int(attributes.len() as i32);
        for &(k, v) in attributes {
            w.int(k);
            w.int(v);
        }
        w.int(children);
    }

    fn parse(bytes: &[u8]) -> Result<Metadata> {
        Metadata::parse(&mut ByteReader::new(bytes, ByteOrder::BigEndian, true, 0))
    }

    const STRINGS: &[&str] = &[
        "root",                // 0
        "metadata",            // 1
        "class",               // 2
        "id",                  // 3
        "name",                // 4
        "superType",           // 5
        "field",               // 6
        "constantPool",        // 7
        "true",                // 8
        "dimension",           // 9
        "1",                   // 10
        "2",                   // 11
        "long",                // 12
        "100",                 // 13
        "jdk.ExecutionSample", // 14
        "jdk.jfr.Event",       // 15
        "startTime",           // 16
        "stackTrace",          // 17
        "24",                  // 18
        "annotation",          // 19
        "setting",             // 20
        "region",              // 21
        "locale",              // 22
        "en_US",               // 23
        "frames",              // 24
        "simpleType",          // 25
        "false",               // 26
    ];

    #[test]
    fn parses_the_element_tree() {
        let bytes = record(STRINGS, |w| {
            element(w, 0, &[], 2);
            element(w, 1, &[], 2);
            element(w, 2, &[(3, 11), (4, 12)], 0);
            element(w, 2, &[(3, 13), (4, 14), (5, 15), (25, 26)], 5);
            element(w, 19, &[(2, 11), (4, 14)], 0);
            element(w, 6, &[(4, 16), (2, 11)], 0);
            element(w, 6, &[(4, 17), (2, 18), (7, 8)], 0);
            element(w, 6, &[(4, 24), (2, 18), (9, 10)], 0);
            element(w, 20, &[(4, 22), (2, 11)], 0);
            element(w, 21, &[(22, 23)], 0);
        });

        let metadata = parse(&bytes).unwrap();
        assert_eq!(metadata.len(), 2);
        let long = metadata.get(2).unwrap();
        assert_eq!(long.primitive, Some(Primitive::Long));
        assert!(!long.is_event());

        let sample = metadata.by_name("jdk.ExecutionSample").unwrap();
        assert_eq!(sample.id, 100);
        assert!(sample.is_event());
        assert_eq!(
            sample.fields,
            vec![
                FieldDesc {
                    name: "startTime".into(),
                    type_id: 2,
                    constant_pool: false,
                    array: false,
                },
                FieldDesc {
                    name: "stackTrace".into(),
                    type_id: 24,
                    constant_pool: true,
                    array: false,
                },
                FieldDesc {
                    name: "frames".into(),
                    type_id: 24,
                    constant_pool: false,
                    array: true,
                },
            ]
        );
        assert_eq!(metadata.event_types().count(), 1);
    }

    #[test]
    fn reserved_ids_are_rejected() {
        let bytes = record(STRINGS, |w| {
            element(w, 0, &[], 1);
            element(w, 1, &[], 1);
            element(w, 2, &[(3, 10), (4, 12)], 0);
        });
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn bad_string_index_is_a_format_error() {
        let bytes = record(STRINGS, |w| {
            element(w, 0, &[], 1);
            element(w, 1, &[], 1);
            element(w, 2, &[(3, 11), (4, 99)], 0);
        });
        match parse(&bytes) {
            Err(crate::error::Error::Format { reason, .. }) => {
                assert!(reason.contains("99"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other.map(|m| m.len())),
        }
    }

    #[test]
    fn multi_dimensional_arrays_are_rejected() {
        let bytes = record(STRINGS, |w| {
            element(w, 0, &[], 1);
            element(w, 1, &[], 1);
            element(w, 2, &[(3, 13), (4, 14)], 1);
            element(w, 6, &[(4, 24), (2, 11), (9, 11)], 0);
        });
        assert!(parse(&bytes).is_err());
    }
}
