use bitvec::prelude::{BitVec, Msb0};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A decoded value, shaped like the ASN.1 type it was decoded against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i128),
    Enumerated(String),
    Null,
    OctetString(Vec<u8>),
    BitString(BitVec<u8, Msb0>),
    ObjectIdentifier(Vec<u64>),
    String(String),
    Time(String),
    /// SEQUENCE or SET components, in declaration order
    Sequence(Vec<(String, Value)>),
    Choice(String, Box<Value>),
    /// SEQUENCE OF or SET OF elements, in encoding order
    List(Vec<Value>),
    /// The complete TLV of an ANY value
    Any(Vec<u8>),
}

impl Value {
    pub fn choice(alternative: impl Into<String>, value: Value) -> Self {
        Value::Choice(alternative.into(), Box::new(value))
    }

    /// Looks up a SEQUENCE/SET component by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Sequence(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Boolean(b) => serializer.serialize_bool(*b),
            // i128 isn't representable in every serde format, and CDR
            // counters fit in 64 bits
            Value::Integer(i) => match i64::try_from(*i) {
                Ok(small) => serializer.serialize_i64(small),
                Err(_) => match u64::try_from(*i) {
                    Ok(unsigned) => serializer.serialize_u64(unsigned),
                    Err(_) => serializer.serialize_str(&i.to_string()),
                },
            },
            Value::Enumerated(label) => serializer.serialize_str(label),
            Value::Null => serializer.serialize_unit(),
            Value::OctetString(bytes) | Value::Any(bytes) => serializer.serialize_str(&hex(bytes)),
            Value::BitString(bits) => {
                let text: String = bits.iter().map(|bit| if *bit { '1' } else { '0' }).collect();
                serializer.serialize_str(&text)
            }
            Value::ObjectIdentifier(arcs) => {
                let dotted: Vec<String> = arcs.iter().map(u64::to_string).collect();
                serializer.serialize_str(&dotted.join("."))
            }
            Value::String(s) | Value::Time(s) => serializer.serialize_str(s),
            Value::Sequence(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Value::Choice(alternative, value) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(alternative, value)?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}
