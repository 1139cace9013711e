//! Runtime ASN.1 schema compilation and BER decoding.
//!
//! Schemas are compiled from source text at runtime, so a CDR layout can be
//! swapped without rebuilding anything:
//!
//! ```
//! use ber_schema::{Schema, Value};
//!
//! let schema = Schema::compile(
//!     "Cdr DEFINITIONS IMPLICIT TAGS ::= BEGIN
//!      Record ::= SEQUENCE { recordType [0] INTEGER }
//!      END",
//! )
//! .unwrap();
//! let value = schema.decode("Record", &[0x30, 0x03, 0x80, 0x01, 0x13]).unwrap();
//! assert_eq!(value.field("recordType"), Some(&Value::Integer(19)));
//! ```

pub mod ber;
pub mod compiler;
pub mod decode;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod value;

pub use ber::{encode_tlv, integer_content, BerError};
pub use compiler::{CompileError, Schema};
pub use decode::{DecodeError, DecodeErrorKind};
pub use types::{Class, Tag};
pub use value::{hex, Value};
