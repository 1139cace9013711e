//! BER tag-length-value framing on top of `asn1-rs`.
//!
//! [`TlvReader`] walks a buffer one TLV at a time without copying; offsets in
//! errors are absolute positions in the buffer handed to the outermost
//! reader, so they can be matched against a hex dump of the input.

use asn1_rs::{Any, FromBer, Length};
use thiserror::Error;

use crate::types::{Class, Tag};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BerError {
    #[error("offset {offset}: truncated encoding")]
    Truncated { offset: usize },
    #[error("offset {offset}: malformed encoding: {cause}")]
    Malformed { offset: usize, cause: String },
    #[error("offset {0}: indefinite length on a primitive encoding")]
    IndefinitePrimitive(usize),
    #[error("offset {0}: unexpected end-of-contents marker")]
    UnexpectedEndOfContents(usize),
}

impl BerError {
    pub fn offset(&self) -> usize {
        match self {
            BerError::Truncated { offset } | BerError::Malformed { offset, .. } => *offset,
            BerError::IndefinitePrimitive(offset) | BerError::UnexpectedEndOfContents(offset) => {
                *offset
            }
        }
    }
}

impl From<asn1_rs::Class> for Class {
    fn from(class: asn1_rs::Class) -> Self {
        match class {
            asn1_rs::Class::Universal => Class::Universal,
            asn1_rs::Class::Application => Class::Application,
            asn1_rs::Class::ContextSpecific => Class::Context,
            asn1_rs::Class::Private => Class::Private,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tlv<'a> {
    pub tag: Tag,
    pub constructed: bool,
    pub content: &'a [u8],
    /// The complete encoding, identifier and length octets included
    pub raw: &'a [u8],
    pub offset: usize,
    pub content_offset: usize,
}

impl<'a> Tlv<'a> {
    /// Reader over the TLVs nested inside a constructed encoding
    pub fn children(&self) -> TlvReader<'a> {
        TlvReader {
            data: self.content,
            base: self.content_offset,
            pos: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TlvReader {
            data,
            base: 0,
            pos: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Absolute offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn peek(&self) -> Result<Option<Tlv<'a>>, BerError> {
        if self.is_empty() {
            return Ok(None);
        }
        let data = self.data;
        let rest = &data[self.pos..];
        if rest.starts_with(&[0, 0]) {
            return Err(BerError::UnexpectedEndOfContents(self.offset()));
        }
        parse_tlv(rest, self.offset()).map(Some)
    }

    pub fn read(&mut self) -> Result<Option<Tlv<'a>>, BerError> {
        let Some(tlv) = self.peek()? else {
            return Ok(None);
        };
        self.pos += tlv.raw.len();
        Ok(Some(tlv))
    }
}

fn parse_tlv(data: &[u8], base: usize) -> Result<Tlv<'_>, BerError> {
    let (rest, any) = <Any as FromBer>::from_ber(data).map_err(|err| match err {
        nom::Err::Incomplete(_) => BerError::Truncated { offset: base },
        nom::Err::Error(cause) | nom::Err::Failure(cause) => BerError::Malformed {
            offset: base,
            cause: cause.to_string(),
        },
    })?;
    let constructed = any.header.is_constructed();
    let indefinite = matches!(any.header.length(), Length::Indefinite);
    if indefinite && !constructed {
        return Err(BerError::IndefinitePrimitive(base));
    }

    let consumed = data.len() - rest.len();
    // `any.data` borrows from `data`
    let content_start = any.data.as_ptr() as usize - data.as_ptr() as usize;
    let mut content = any.data;
    if indefinite && content_start + content.len() == consumed {
        // the end-of-contents octets were left in the content
        content = &content[..content.len().saturating_sub(2)];
    }
    Ok(Tlv {
        tag: Tag {
            class: Class::from(any.header.class()),
            number: any.header.tag().0,
        },
        constructed,
        content,
        raw: &data[..consumed],
        offset: base,
        content_offset: base + content_start,
    })
}

/// Encodes one TLV with a definite length. Used to build fixtures and by
/// tooling that re-wraps decoded fragments.
pub fn encode_tlv(tag: Tag, constructed: bool, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    let class_bits = match tag.class {
        Class::Universal => 0x00,
        Class::Application => 0x40,
        Class::Context => 0x80,
        Class::Private => 0xc0,
    };
    let constructed_bit = if constructed { 0x20 } else { 0x00 };
    if tag.number < 0x1f {
        out.push(class_bits | constructed_bit | tag.number as u8);
    } else {
        out.push(class_bits | constructed_bit | 0x1f);
        let mut groups = Vec::new();
        let mut number = tag.number;
        loop {
            groups.push((number & 0x7f) as u8);
            number >>= 7;
            if number == 0 {
                break;
            }
        }
        for (i, group) in groups.iter().enumerate().rev() {
            out.push(if i == 0 { *group } else { group | 0x80 });
        }
    }

    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let bytes = (content.len() as u64).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Minimal two's-complement content octets of an INTEGER
pub fn integer_content(value: i128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form() {
        let data = [0x80, 0x01, 0x13, 0x81, 0x00];
        let mut reader = TlvReader::new(&data);
        let first = reader.read().unwrap().unwrap();
        assert_eq!(first.tag, Tag::context(0));
        assert!(!first.constructed);
        assert_eq!(first.content, &[0x13]);
        let second = reader.read().unwrap().unwrap();
        assert_eq!(second.tag, Tag::context(1));
        assert_eq!(second.offset, 3);
        assert!(second.content.is_empty());
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_high_tag_number_and_long_length() {
        let content = vec![0xab; 200];
        let encoded = encode_tlv(Tag::context(300), false, &content);
        assert_eq!(&encoded[..5], &[0x9f, 0x82, 0x2c, 0x81, 0xc8]);
        let tlv = TlvReader::new(&encoded).read().unwrap().unwrap();
        assert_eq!(tlv.tag, Tag::context(300));
        assert_eq!(tlv.content.len(), 200);
        assert_eq!(tlv.content_offset, 5);
    }

    #[test]
    fn test_indefinite_length() {
        // [APPLICATION 1] { INTEGER 5, [0] { BOOLEAN TRUE } EOC } EOC
        let data = [
            0x61, 0x80, 0x02, 0x01, 0x05, 0xa0, 0x80, 0x01, 0x01, 0xff, 0x00, 0x00, 0x00, 0x00,
        ];
        let tlv = TlvReader::new(&data).read().unwrap().unwrap();
        assert_eq!(tlv.raw.len(), data.len());
        let mut children = tlv.children();
        assert_eq!(children.read().unwrap().unwrap().content, &[0x05]);
        let nested = children.read().unwrap().unwrap();
        assert_eq!(nested.content, &[0x01, 0x01, 0xff]);
        assert!(children.is_empty());
    }

    #[test]
    fn test_truncation_errors() {
        for data in [&[0x30][..], &[0x04, 0x05, 0x01], &[0x30, 0x80, 0x02, 0x01, 0x05]] {
            let err = TlvReader::new(data).read().unwrap_err();
            assert!(
                matches!(err, BerError::Truncated { .. } | BerError::Malformed { .. }),
                "{err:?}"
            );
            assert_eq!(err.offset(), 0);
        }
        let err = TlvReader::new(&[0x04, 0x80, 0x00, 0x00]).read().unwrap_err();
        assert!(
            matches!(err, BerError::IndefinitePrimitive(0) | BerError::Malformed { offset: 0, .. }),
            "{err:?}"
        );
        assert_eq!(
            TlvReader::new(&[0x00, 0x00]).read(),
            Err(BerError::UnexpectedEndOfContents(0))
        );
    }

    #[test]
    fn test_nested_offsets_are_absolute() {
        let data = [0x30, 0x06, 0x80, 0x01, 0x13, 0x81, 0x01, 0x05];
        let tlv = TlvReader::new(&data).read().unwrap().unwrap();
        let mut children = tlv.children();
        children.read().unwrap();
        assert_eq!(children.offset(), 5);
        let second = children.read().unwrap().unwrap();
        assert_eq!(second.offset, 5);
        assert_eq!(second.content_offset, 7);
        assert_eq!(second.content, &[0x05]);
    }

    #[test]
    fn test_integer_content() {
        assert_eq!(integer_content(0), vec![0x00]);
        assert_eq!(integer_content(127), vec![0x7f]);
        assert_eq!(integer_content(128), vec![0x00, 0x80]);
        assert_eq!(integer_content(-1), vec![0xff]);
        assert_eq!(integer_content(-129), vec![0xff, 0x7f]);
        assert_eq!(integer_content(4294967295), vec![0x00, 0xff, 0xff, 0xff, 0xff]);
    }
}
