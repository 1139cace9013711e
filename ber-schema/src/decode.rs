//! Schema-driven BER decoding into [`Value`] trees.

use std::fmt;

use bitvec::prelude::{BitVec, Msb0};
use log::debug;
use thiserror::Error;

use crate::ber::{BerError, Tlv, TlvReader};
use crate::compiler::Schema;
use crate::types::{
    Alternatives, Components, DefaultValue, Enumeration, Presence, StringKind, Tag, TagMode, Type,
};
use crate::value::Value;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeErrorKind {
    #[error(transparent)]
    Ber(#[from] BerError),
    #[error("no type named {0} in schema")]
    UnknownType(String),
    #[error("no data to decode")]
    Empty,
    #[error("offset {offset}: expected {expected}, found tag {found}")]
    UnexpectedTag {
        offset: usize,
        expected: String,
        found: Tag,
    },
    #[error("offset {offset}: tag {found} selects no CHOICE alternative")]
    UnknownAlternative { offset: usize, found: Tag },
    #[error("offset {offset}: mandatory component {name} is missing")]
    MissingComponent { offset: usize, name: String },
    #[error("offset {offset}: component {name} appears twice in SET")]
    DuplicateComponent { offset: usize, name: String },
    #[error("offset {offset}: unexpected element with tag {found}")]
    UnexpectedElement { offset: usize, found: Tag },
    #[error("offset {offset}: {what} must use {form} encoding")]
    WrongForm {
        offset: usize,
        what: String,
        form: &'static str,
    },
    #[error("offset {offset}: invalid {what} content")]
    InvalidContent { offset: usize, what: &'static str },
    #[error("offset {0}: INTEGER does not fit in 128 bits")]
    IntegerTooLarge(usize),
    #[error("offset {offset}: {value} is not a value of the ENUMERATED type")]
    UnknownEnumeration { offset: usize, value: i128 },
    #[error("values nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// A decode failure and the component path at which it happened
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub path: Vec<String>,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    fn within(mut self, segment: impl Into<String>) -> Self {
        self.path.insert(0, segment.into());
        self
    }

    /// The path as written in reports, e.g. `record.volumes[2].uplink`
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            if !out.is_empty() && !segment.starts_with('[') {
                out.push('.');
            }
            out.push_str(segment);
        }
        out
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "at {}: {}", self.path_string(), self.kind)
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<DecodeErrorKind> for DecodeError {
    fn from(kind: DecodeErrorKind) -> Self {
        DecodeError {
            path: Vec::new(),
            kind,
        }
    }
}

impl From<BerError> for DecodeError {
    fn from(err: BerError) -> Self {
        DecodeErrorKind::Ber(err).into()
    }
}

fn fail<T>(kind: DecodeErrorKind) -> Result<T, DecodeError> {
    Err(kind.into())
}

impl Schema {
    /// Decodes the first TLV in `data` as a value of type `root`.
    pub fn decode(&self, root: &str, data: &[u8]) -> Result<Value, DecodeError> {
        self.decode_prefix(root, data).map(|(value, _)| value)
    }

    /// Like [`Schema::decode`], also returning how many bytes the value
    /// occupied so callers can detect trailing data.
    pub fn decode_prefix(&self, root: &str, data: &[u8]) -> Result<(Value, usize), DecodeError> {
        let ty = self
            .types
            .get(root)
            .ok_or_else(|| DecodeErrorKind::UnknownType(root.to_string()))?;
        let tlv = TlvReader::new(data).read()?.ok_or(DecodeErrorKind::Empty)?;
        let value = Decoder { schema: self }.value(ty, &tlv, 0)?;
        Ok((value, tlv.raw.len()))
    }
}

struct Decoder<'s> {
    schema: &'s Schema,
}

impl<'s> Decoder<'s> {
    fn lookup(&self, name: &str) -> Result<&'s Type, DecodeError> {
        self.schema
            .types
            .get(name)
            .ok_or_else(|| DecodeErrorKind::UnknownType(name.to_string()).into())
    }

    // whether an encoding starting with `tag` can be a value of `ty`
    fn matches(&self, ty: &Type, tag: Tag) -> bool {
        match ty {
            Type::Tagged { tag: own, .. } => *own == tag,
            Type::Reference(name) => self
                .schema
                .types
                .get(name)
                .is_some_and(|target| self.matches(target, tag)),
            Type::Choice(a) => a
                .alternatives
                .iter()
                .any(|alternative| self.matches(&alternative.ty, tag)),
            Type::Any => true,
            builtin => builtin.universal_tag() == Some(tag),
        }
    }

    // strips tags and references down to the builtin type
    fn underlying<'t>(&self, mut ty: &'t Type) -> Option<&'t Type>
    where
        's: 't,
    {
        for _ in 0..MAX_DEPTH {
            match ty {
                Type::Tagged { inner, .. } => ty = inner,
                Type::Reference(name) => ty = self.schema.types.get(name)?,
                builtin => return Some(builtin),
            }
        }
        None
    }

    fn value(&self, ty: &Type, tlv: &Tlv<'_>, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return fail(DecodeErrorKind::TooDeep);
        }
        match ty {
            Type::Tagged { tag, .. } => {
                if tlv.tag != *tag {
                    return fail(DecodeErrorKind::UnexpectedTag {
                        offset: tlv.offset,
                        expected: tag.to_string(),
                        found: tlv.tag,
                    });
                }
                self.content(ty, tlv, depth + 1)
            }
            Type::Reference(name) => self.value(self.lookup(name)?, tlv, depth + 1),
            Type::Choice(a) => self.choice(a, tlv, depth + 1),
            Type::Any => Ok(Value::Any(tlv.raw.to_vec())),
            builtin => {
                if builtin.universal_tag() != Some(tlv.tag) {
                    return fail(DecodeErrorKind::UnexpectedTag {
                        offset: tlv.offset,
                        expected: builtin.describe(),
                        found: tlv.tag,
                    });
                }
                self.content(builtin, tlv, depth + 1)
            }
        }
    }

    // decodes the content octets of `tlv` as `ty`, whatever its identifier
    // says; this is where implicit tags land
    fn content(&self, ty: &Type, tlv: &Tlv<'_>, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return fail(DecodeErrorKind::TooDeep);
        }
        match ty {
            Type::Tagged {
                mode: TagMode::Implicit,
                inner,
                ..
            } => self.content(inner, tlv, depth + 1),
            Type::Tagged { inner, .. } => {
                require_constructed(tlv, "explicitly tagged value")?;
                let mut children = tlv.children();
                let Some(wrapped) = children.read()? else {
                    return fail(DecodeErrorKind::InvalidContent {
                        offset: tlv.content_offset,
                        what: "explicit tag",
                    });
                };
                if let Some(extra) = children.read()? {
                    return fail(DecodeErrorKind::UnexpectedElement {
                        offset: extra.offset,
                        found: extra.tag,
                    });
                }
                self.value(inner, &wrapped, depth + 1)
            }
            Type::Reference(name) => self.content(self.lookup(name)?, tlv, depth + 1),
            Type::Any => Ok(Value::Any(tlv.raw.to_vec())),
            Type::Choice(_) => fail(DecodeErrorKind::WrongForm {
                offset: tlv.offset,
                what: "CHOICE".to_string(),
                form: "explicitly tagged",
            }),
            Type::Boolean => {
                require_primitive(tlv, "BOOLEAN")?;
                match tlv.content {
                    [b] => Ok(Value::Boolean(*b != 0)),
                    _ => fail(invalid(tlv, "BOOLEAN")),
                }
            }
            Type::Null => {
                require_primitive(tlv, "NULL")?;
                if tlv.content.is_empty() {
                    Ok(Value::Null)
                } else {
                    fail(invalid(tlv, "NULL"))
                }
            }
            Type::Integer => Ok(Value::Integer(integer(tlv)?)),
            Type::Enumerated(e) => enumerated(e, tlv),
            Type::OctetString => Ok(Value::OctetString(string_octets(tlv, depth)?)),
            Type::BitString => bit_string(tlv),
            Type::ObjectIdentifier => object_identifier(tlv),
            Type::CharString(kind) => {
                let octets = string_octets(tlv, depth)?;
                Ok(Value::String(char_string(*kind, &octets, tlv)?))
            }
            Type::Time(_) => {
                let octets = string_octets(tlv, depth)?;
                Ok(Value::Time(octets.iter().map(|b| char::from(*b)).collect()))
            }
            Type::Sequence(c) => self.sequence(c, tlv, depth),
            Type::Set(c) => self.set(c, tlv, depth),
            Type::SequenceOf(element) | Type::SetOf(element) => {
                require_constructed(tlv, &ty.describe())?;
                let mut children = tlv.children();
                let mut items = Vec::new();
                while let Some(child) = children.read()? {
                    let index = items.len();
                    let item = self
                        .value(element, &child, depth + 1)
                        .map_err(|e| e.within(format!("[{index}]")))?;
                    items.push(item);
                }
                Ok(Value::List(items))
            }
        }
    }

    fn choice(&self, a: &Alternatives, tlv: &Tlv<'_>, depth: usize) -> Result<Value, DecodeError> {
        let Some(alternative) = a
            .alternatives
            .iter()
            .find(|alternative| self.matches(&alternative.ty, tlv.tag))
        else {
            return fail(DecodeErrorKind::UnknownAlternative {
                offset: tlv.offset,
                found: tlv.tag,
            });
        };
        let value = self
            .value(&alternative.ty, tlv, depth + 1)
            .map_err(|e| e.within(&alternative.name))?;
        Ok(Value::choice(&alternative.name, value))
    }

    fn sequence(&self, c: &Components, tlv: &Tlv<'_>, depth: usize) -> Result<Value, DecodeError> {
        require_constructed(tlv, "SEQUENCE")?;
        let mut children = tlv.children();
        let mut fields = Vec::with_capacity(c.components.len());
        for component in &c.components {
            match children.peek()? {
                Some(child) if self.matches(&component.ty, child.tag) => {
                    children.read()?;
                    let value = self
                        .value(&component.ty, &child, depth + 1)
                        .map_err(|e| e.within(&component.name))?;
                    fields.push((component.name.clone(), value));
                }
                _ => {
                    if let Some(value) =
                        self.absent(&component.name, &component.ty, &component.presence, &children)?
                    {
                        fields.push((component.name.clone(), value));
                    }
                }
            }
        }
        while let Some(child) = children.read()? {
            if !c.extensible {
                return fail(DecodeErrorKind::UnexpectedElement {
                    offset: child.offset,
                    found: child.tag,
                });
            }
            debug!("skipping unknown SEQUENCE extension {} at offset {}", child.tag, child.offset);
        }
        Ok(Value::Sequence(fields))
    }

    fn set(&self, c: &Components, tlv: &Tlv<'_>, depth: usize) -> Result<Value, DecodeError> {
        require_constructed(tlv, "SET")?;
        let mut children = tlv.children();
        let mut found: Vec<Option<Value>> = vec![None; c.components.len()];
        while let Some(child) = children.read()? {
            let position = c
                .components
                .iter()
                .position(|component| self.matches(&component.ty, child.tag));
            let Some(i) = position else {
                if !c.extensible {
                    return fail(DecodeErrorKind::UnexpectedElement {
                        offset: child.offset,
                        found: child.tag,
                    });
                }
                debug!("skipping unknown SET extension {} at offset {}", child.tag, child.offset);
                continue;
            };
            let component = &c.components[i];
            if found[i].is_some() {
                return fail(DecodeErrorKind::DuplicateComponent {
                    offset: child.offset,
                    name: component.name.clone(),
                });
            }
            let value = self
                .value(&component.ty, &child, depth + 1)
                .map_err(|e| e.within(&component.name))?;
            found[i] = Some(value);
        }

        let mut fields = Vec::with_capacity(c.components.len());
        for (component, slot) in c.components.iter().zip(found) {
            let value = match slot {
                Some(value) => Some(value),
                None => self.absent(&component.name, &component.ty, &component.presence, &children)?,
            };
            if let Some(value) = value {
                fields.push((component.name.clone(), value));
            }
        }
        Ok(Value::Sequence(fields))
    }

    // what an absent component decodes to: nothing, its DEFAULT, or an error
    fn absent(
        &self,
        name: &str,
        ty: &Type,
        presence: &Presence,
        children: &TlvReader<'_>,
    ) -> Result<Option<Value>, DecodeError> {
        match presence {
            Presence::Optional => Ok(None),
            Presence::Default(default) => Ok(self.default_value(ty, default)),
            Presence::Required => fail(DecodeErrorKind::MissingComponent {
                offset: children.offset(),
                name: name.to_string(),
            }),
        }
    }

    fn default_value(&self, ty: &Type, default: &DefaultValue) -> Option<Value> {
        let underlying = self.underlying(ty)?;
        match (default, underlying) {
            (DefaultValue::Boolean(b), Type::Boolean) => Some(Value::Boolean(*b)),
            (DefaultValue::Integer(i), Type::Integer) => Some(Value::Integer(*i)),
            (DefaultValue::Null, Type::Null) => Some(Value::Null),
            (DefaultValue::Identifier(name), Type::Enumerated(e))
                if e.items.iter().any(|(item, _)| item == name) =>
            {
                Some(Value::Enumerated(name.clone()))
            }
            _ => None,
        }
    }
}

fn invalid(tlv: &Tlv<'_>, what: &'static str) -> DecodeErrorKind {
    DecodeErrorKind::InvalidContent {
        offset: tlv.content_offset,
        what,
    }
}

fn require_primitive(tlv: &Tlv<'_>, what: &str) -> Result<(), DecodeError> {
    if tlv.constructed {
        return fail(DecodeErrorKind::WrongForm {
            offset: tlv.offset,
            what: what.to_string(),
            form: "primitive",
        });
    }
    Ok(())
}

fn require_constructed(tlv: &Tlv<'_>, what: &str) -> Result<(), DecodeError> {
    if !tlv.constructed {
        return fail(DecodeErrorKind::WrongForm {
            offset: tlv.offset,
            what: what.to_string(),
            form: "constructed",
        });
    }
    Ok(())
}

fn integer(tlv: &Tlv<'_>) -> Result<i128, DecodeError> {
    require_primitive(tlv, "INTEGER")?;
    let content = tlv.content;
    let Some(first) = content.first() else {
        return fail(invalid(tlv, "INTEGER"));
    };
    if content.len() > 16 {
        return fail(DecodeErrorKind::IntegerTooLarge(tlv.offset));
    }
    let init: i128 = if first & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(init, |acc, b| (acc << 8) | i128::from(*b)))
}

fn enumerated(e: &Enumeration, tlv: &Tlv<'_>) -> Result<Value, DecodeError> {
    let value = integer(tlv)?;
    match e.label(value) {
        Some(label) => Ok(Value::Enumerated(label.to_string())),
        // an addition we don't know about yet
        None if e.extensible => Ok(Value::Integer(value)),
        None => fail(DecodeErrorKind::UnknownEnumeration {
            offset: tlv.offset,
            value,
        }),
    }
}

// primitive content, or the concatenated segments of a constructed string
fn string_octets(tlv: &Tlv<'_>, depth: usize) -> Result<Vec<u8>, DecodeError> {
    if !tlv.constructed {
        return Ok(tlv.content.to_vec());
    }
    if depth > MAX_DEPTH {
        return fail(DecodeErrorKind::TooDeep);
    }
    let mut octets = Vec::new();
    let mut children = tlv.children();
    while let Some(segment) = children.read()? {
        octets.extend(string_octets(&segment, depth + 1)?);
    }
    Ok(octets)
}

fn bit_string(tlv: &Tlv<'_>) -> Result<Value, DecodeError> {
    require_primitive(tlv, "BIT STRING")?;
    let Some((&unused, rest)) = tlv.content.split_first() else {
        return fail(invalid(tlv, "BIT STRING"));
    };
    if unused > 7 || (rest.is_empty() && unused != 0) {
        return fail(invalid(tlv, "BIT STRING"));
    }
    let mut bits: BitVec<u8, Msb0> = BitVec::from_vec(rest.to_vec());
    bits.truncate(rest.len() * 8 - usize::from(unused));
    Ok(Value::BitString(bits))
}

fn object_identifier(tlv: &Tlv<'_>) -> Result<Value, DecodeError> {
    require_primitive(tlv, "OBJECT IDENTIFIER")?;
    if !matches!(tlv.content.last(), Some(b) if b & 0x80 == 0) {
        return fail(invalid(tlv, "OBJECT IDENTIFIER"));
    }
    let mut subidentifiers = Vec::new();
    let mut current: u64 = 0;
    for b in tlv.content {
        if current > (u64::MAX >> 7) {
            return fail(invalid(tlv, "OBJECT IDENTIFIER"));
        }
        current = (current << 7) | u64::from(b & 0x7f);
        if b & 0x80 == 0 {
            subidentifiers.push(current);
            current = 0;
        }
    }
    let first = subidentifiers[0];
    let mut arcs = match first {
        0..=39 => vec![0, first],
        40..=79 => vec![1, first - 40],
        _ => vec![2, first - 80],
    };
    arcs.extend_from_slice(&subidentifiers[1..]);
    Ok(Value::ObjectIdentifier(arcs))
}

fn char_string(kind: StringKind, octets: &[u8], tlv: &Tlv<'_>) -> Result<String, DecodeError> {
    match kind {
        StringKind::Utf8 => {
            String::from_utf8(octets.to_vec()).map_err(|_| invalid(tlv, "UTF8String").into())
        }
        StringKind::Bmp => {
            if octets.len() % 2 != 0 {
                return fail(invalid(tlv, "BMPString"));
            }
            octets
                .chunks_exact(2)
                .map(|pair| char::from_u32(u32::from(u16::from_be_bytes([pair[0], pair[1]]))))
                .collect::<Option<String>>()
                .ok_or_else(|| invalid(tlv, "BMPString").into())
        }
        StringKind::Universal => {
            if octets.len() % 4 != 0 {
                return fail(invalid(tlv, "UniversalString"));
            }
            octets
                .chunks_exact(4)
                .map(|quad| char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]])))
                .collect::<Option<String>>()
                .ok_or_else(|| invalid(tlv, "UniversalString").into())
        }
        // the 8-bit repertoires map byte-for-byte onto Latin-1
        _ => Ok(octets.iter().map(|b| char::from(*b)).collect()),
    }
}
