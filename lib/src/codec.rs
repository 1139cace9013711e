//! The seam between the pipeline and the ASN.1 engine.
//!
//! The pipeline only needs to compile sanitized schema text and decode bytes
//! against a named type, so those two steps are traits. [`BerCompiler`] plugs
//! in the `ber-schema` engine; tests substitute their own.

use std::path::PathBuf;

use ber_schema::{Schema, Value};
use log::warn;
use thiserror::Error;

use crate::error::BoxError;
use crate::sanitize::SanitizedSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingRule {
    Ber,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("couldn't read schema {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema rejected: {0}")]
    Rejected(#[source] BoxError),
}

#[derive(Debug, Error)]
#[error("couldn't decode {root_type}: {cause}")]
pub struct DecodeError {
    pub root_type: String,
    /// Where in the record decoding stopped, if the engine knows
    pub path: Option<String>,
    #[source]
    pub cause: BoxError,
}

pub trait SchemaCompiler {
    type Compiled: CompiledSchema;

    fn compile(
        &self,
        schema: &SanitizedSchema,
        rule: EncodingRule,
    ) -> Result<Self::Compiled, SchemaError>;
}

pub trait CompiledSchema {
    fn decode(&self, root_type: &str, bytes: &[u8]) -> Result<Value, DecodeError>;

    /// Decodes the value at the start of `bytes`, also returning how many
    /// bytes it occupied. Engines that can't tell report all of them.
    fn decode_prefix(&self, root_type: &str, bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
        self.decode(root_type, bytes).map(|value| (value, bytes.len()))
    }
}

/// Compiles schemas with the `ber-schema` engine
#[derive(Debug, Clone, Copy, Default)]
pub struct BerCompiler;

impl SchemaCompiler for BerCompiler {
    type Compiled = Schema;

    fn compile(&self, schema: &SanitizedSchema, rule: EncodingRule) -> Result<Schema, SchemaError> {
        match rule {
            EncodingRule::Ber => {
                Schema::compile(schema.as_str()).map_err(|err| SchemaError::Rejected(Box::new(err)))
            }
        }
    }
}

fn ber_decode_error(root_type: &str, err: ber_schema::DecodeError) -> DecodeError {
    DecodeError {
        root_type: root_type.to_string(),
        path: (!err.path.is_empty()).then(|| err.path_string()),
        cause: Box::new(err),
    }
}

impl CompiledSchema for Schema {
    fn decode(&self, root_type: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
        Schema::decode(self, root_type, bytes).map_err(|err| ber_decode_error(root_type, err))
    }

    fn decode_prefix(&self, root_type: &str, bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
        Schema::decode_prefix(self, root_type, bytes).map_err(|err| ber_decode_error(root_type, err))
    }
}

/// Decodes the first record in `bytes`. Anything after it is ignored, with a
/// warning, since files holding more than one record aren't supported.
pub fn decode_record(
    schema: &impl CompiledSchema,
    root_type: &str,
    bytes: &[u8],
) -> Result<Value, DecodeError> {
    let (value, used) = schema.decode_prefix(root_type, bytes)?;
    if used < bytes.len() {
        warn!(
            "ignoring {} bytes after the first {root_type} ({used} bytes)",
            bytes.len() - used
        );
    }
    Ok(value)
}
