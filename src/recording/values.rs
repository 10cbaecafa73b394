use ahash::{AHashMap, AHashSet};

use super::io::{ByteReader, RawString};
use super::metadata::{FieldDesc, Metadata, Primitive, CONSTANT_POOL_RECORD};
use crate::error::Result;

/// Nesting limit for inline (non constant pool) values.
const MAX_NESTING: usize = 32;

/// A decoded value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A null string or unresolvable reference.
    Null,
    /// `boolean`.
    Boolean(bool),
    /// `byte`, `short`, `int` and `long`.
    Long(i64),
    /// `float` and `double`.
    Double(f64),
    /// `char`.
    Char(char),
    /// `java.lang.String`.
    String(String),
    /// A key into the constant pool of `type_id`.
    Ref {
        /// Type of the referenced pool.
        type_id: u64,
        /// Key within that pool.
        key: i64,
    },
    /// A composite value, fields in the order its type declares them.
    Object {
        /// Type of the object.
        type_id: u64,
        /// Field values.
        fields: Vec<Value>,
    },
    /// An array field.
    Array(Vec<Value>),
}

impl Value {
    /// The value as an integer, if it is one.
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Value::Long(v) => Some(v),
            Value::Boolean(b) => Some(i64::from(b)),
            _ => None,
        }
    }

    /// The value as a float, if it is numeric.
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            Value::Long(v) => Some(v as f64),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

/// Decodes a value of the given type.
pub(crate) fn read_value(
    reader: &mut ByteReader<'_>,
    metadata: &Metadata,
    type_id: u64,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_NESTING {
        return Err(reader.error(format!("values nested deeper than {}", MAX_NESTING)));
    }
    let desc = metadata
        .get(type_id)
        .ok_or_else(|| reader.error(format!("unknown type id {}", type_id)))?;
    if let Some(primitive) = desc.primitive {
        return read_primitive(reader, metadata, primitive);
    }
    let mut fields = Vec::with_capacity(desc.fields.len());
    for field in &desc.fields {
        fields.push(read_field(reader, metadata, field, depth)?);
    }
    Ok(Value::Object { type_id, fields })
}

pub(crate) fn read_field(
    reader: &mut ByteReader<'_>,
    metadata: &Metadata,
    field: &FieldDesc,
    depth: usize,
) -> Result<Value> {
    if field.array {
        let n = reader.count()?;
        let mut elements = Vec::with_capacity(n);
        for _ in 0..n {
            elements.push(read_single(reader, metadata, field, depth)?);
        }
        Ok(Value::Array(elements))
    } else {
        read_single(reader, metadata, field, depth)
    }
}

fn read_single(
    reader: &mut ByteReader<'_>,
    metadata: &Metadata,
    field: &FieldDesc,
    depth: usize,
) -> Result<Value> {
    if field.constant_pool {
        Ok(Value::Ref {
            type_id: field.type_id,
            key: reader.long()?,
        })
    } else {
        read_value(reader, metadata, field.type_id, depth + 1)
    }
}

fn read_primitive(
    reader: &mut ByteReader<'_>,
    metadata: &Metadata,
    primitive: Primitive,
) -> Result<Value> {
    Ok(match primitive {
        Primitive::Boolean => Value::Boolean(reader.boolean()?),
        Primitive::Byte => Value::Long(i64::from(reader.u8()? as i8)),
        Primitive::Short => Value::Long(i64::from(reader.short()?)),
        Primitive::Int => Value::Long(i64::from(reader.int()?)),
        Primitive::Long => Value::Long(reader.long()?),
        Primitive::Char => Value::Char(reader.char()?),
        Primitive::Float => Value::Double(f64::from(reader.float()?)),
        Primitive::Double => Value::Double(reader.double()?),
        Primitive::String => match reader.string()? {
            RawString::Null => Value::Null,
            RawString::Value(s) => Value::String(s),
            RawString::PoolRef(key) => match metadata.by_name("java.lang.String") {
                Some(desc) => Value::Ref {
                    type_id: desc.id,
                    key,
                },
                None => return Err(reader.error("string constant without a string pool")),
            },
        },
    })
}

/// All constant pool entries of a chunk, keyed by pool type and entry key.
#[derive(Debug, Default)]
pub struct ConstantPools {
    pools: AHashMap<u64, AHashMap<i64, Value>>,
}

impl ConstantPools {
    /// Walks the chain of constant pool records, newest first, starting at `offset` within the
    /// chunk. Entries from newer records win over older ones with the same key.
    pub(crate) fn parse(
        reader: &mut ByteReader<'_>,
        metadata: &Metadata,
        mut offset: u64,
    ) -> Result<Self> {
        let mut pools = ConstantPools::default();
        let mut visited = AHashSet::new();
        while offset != 0 {
            if !visited.insert(offset) {
                return Err(reader.error(format!("constant pool chain loops at {}", offset)));
            }
            reader.seek(offset as usize)?;
            let size = reader.int()?;
            let record_type = reader.long()? as u64;
            if record_type != CONSTANT_POOL_RECORD || size <= 0 {
                return Err(reader.error(format!(
                    "expected constant pool record at chunk offset {}, found type {}",
                    offset, record_type
                )));
            }
            let _start = reader.long()?;
            let _duration = reader.long()?;
            let delta = reader.long()?;
            let _flush = reader.boolean()?;
            let npools = reader.count()?;
            for _ in 0..npools {
                let type_id = reader.long()? as u64;
                let nentries = reader.count()?;
                for _ in 0..nentries {
                    let key = reader.long()?;
                    let value = read_value(reader, metadata, type_id, 0)?;
                    pools
                        .pools
                        .entry(type_id)
                        .or_default()
                        .entry(key)
                        .or_insert(value);
                }
            }
            offset = if delta == 0 {
                0
            } else {
                let previous = offset as i64 + delta;
                if previous <= 0 {
                    return Err(reader.error(format!("constant pool delta {} leaves chunk", delta)));
                }
                previous as u64
            };
        }
        Ok(pools)
    }

    /// Looks up a pool entry.
    pub fn get(&self, type_id: u64, key: i64) -> Option<&Value> {
        self.pools.get(&type_id).and_then(|pool| pool.get(&key))
    }

    /// Number of entries in the pool of `type_id`.
    pub fn pool_len(&self, type_id: u64) -> usize {
        self.pools.get(&type_id).map_or(0, |pool| pool.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::io::ByteWriter;
    use crate::recording::metadata::type_desc;
    use crate::recording::ByteOrder;

    fn field(name: &str, type_id: u64, constant_pool: bool, array: bool) -> FieldDesc {
        FieldDesc {
            name: name.into(),
            type_id,
            constant_pool,
            array,
        }
    }

    fn metadata() -> Metadata {
        let mut m = Metadata::default();
        m.insert(type_desc(2, "long", None, vec![]));
        m.insert(type_desc(3, "java.lang.String", None, vec![]));
        m.insert(type_desc(
            10,
            "Pair",
            None,
            vec![field("a", 2, false, false), field("names", 3, false, true)],
        ));
        m.insert(type_desc(11, "Holder", None, vec![field("pair", 10, true, false)]));
        m.insert(type_desc(12, "Loop", None, vec![field("me", 12, false, false)]));
        m
    }

    #[test]
    fn objects_and_arrays() {
        let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
        w.long(5);
        w.int(2);
        w.string(Some("x"));
        w.string(None);
        let bytes = w.into_inner();
        let v = read_value(
            &mut ByteReader::new(&bytes, ByteOrder::BigEndian, true, 0),
            &metadata(),
            10,
            0,
        )
        .unwrap();
        assert_eq!(
            v,
            Value::Object {
                type_id: 10,
                fields: vec![
                    Value::Long(5),
                    Value::Array(vec![Value::String("x".into()), Value::Null])
                ]
            }
        );
    }

    #[test]
    fn constant_pool_fields_are_references() {
        let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
        w.long(77);
        let bytes = w.into_inner();
        let v = read_value(
            &mut ByteReader::new(&bytes, ByteOrder::BigEndian, true, 0),
            &metadata(),
            11,
            0,
        )
        .unwrap();
        assert_eq!(
            v,
            Value::Object {
                type_id: 11,
                fields: vec![Value::Ref { type_id: 10, key: 77 }]
            }
        );
    }

    #[test]
    fn self_referential_types_are_bounded() {
        let bytes = vec![0u8; 64];
        assert!(read_value(
            &mut ByteReader::new(&bytes, ByteOrder::BigEndian, true, 0),
            &metadata(),
            12,
            0,
        )
        .is_err());
    }

    #[test]
    fn newest_constant_pool_wins() {
        let metadata = metadata();
        let mut w = ByteWriter::new(ByteOrder::BigEndian, true);
        let older = w.len() as i64;
        w.record(CONSTANT_POOL_RECORD, |w| {
            w.long(0);
            w.long(0);
            w.long(0);
            w.boolean(true);
            w.int(1);
            w.long(3);
            w.int(2);
            w.long(1);
            w.string(Some("old-one"));
            w.long(2);
            w.string(Some("old-two"));
        });
        let newer = w.len() as i64;
        w.record(CONSTANT_POOL_RECORD, |w| {
            w.long(0);
            w.long(0);
            w.long(older - newer);
            w.boolean(true);
            w.int(1);
            w.long(3);
            w.int(1);
            w.long(1);
            w.string(Some("new-one"));
        });
        let bytes = w.into_inner();

        // offset 0 terminates the chain, so the older pool cannot sit at 0; shift by one byte.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let mut reader = ByteReader::new(&shifted, ByteOrder::BigEndian, true, 0);
        let pools = ConstantPools::parse(&mut reader, &metadata, newer as u64 + 1).unwrap();
        assert_eq!(pools.get(3, 1), Some(&Value::String("new-one".into())));
        assert_eq!(pools.get(3, 2), Some(&Value::String("old-two".into())));
        assert_eq!(pools.pool_len(3), 2);
    }
}
