use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::debug;

use crate::codec::{EncodingRule, SchemaCompiler, SchemaError, decode_record};
use crate::error::{IoError, PipelineError};
use crate::gate::{Envelope, detect_envelope, gate};
use crate::render::{RenderOptions, RenderedReport, render_with};
use crate::report::persist;
use crate::sanitize::{SanitizeMode, sanitize_with};

pub const DEFAULT_ROOT_TYPE: &str = "CallEventRecord";

/// Everything one run of the pipeline needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub cdr_path: PathBuf,
    pub schema_path: PathBuf,
    pub output_path: PathBuf,
    pub root_type: String,
    pub sanitize_mode: SanitizeMode,
    pub render: RenderOptions,
}

impl PipelineConfig {
    pub fn new(
        cdr_path: impl Into<PathBuf>,
        schema_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        PipelineConfig {
            cdr_path: cdr_path.into(),
            schema_path: schema_path.into(),
            output_path: output_path.into(),
            root_type: DEFAULT_ROOT_TYPE.to_string(),
            sanitize_mode: SanitizeMode::default(),
            render: RenderOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Decompress,
    SanitizeSchema,
    CompileSchema,
    Decode,
    Render,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Decompress => "decompress",
            Stage::SanitizeSchema => "sanitize schema",
            Stage::CompileSchema => "compile schema",
            Stage::Decode => "decode",
            Stage::Render => "render",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub envelope: Envelope,
    pub payload_len: usize,
    pub report_len: usize,
    pub output_path: PathBuf,
}

fn enter(stage: Stage, path: &Path) {
    debug!("{stage}: {}", path.display());
}

// Sanitizing, compiling, decoding and rendering are CPU-bound, so they run
// off the async runtime.
fn decode_and_render<C: SchemaCompiler>(
    config: &PipelineConfig,
    compiler: &C,
    source: &str,
    payload: &[u8],
) -> Result<RenderedReport, PipelineError> {
    let schema = sanitize_with(source, config.sanitize_mode);

    enter(Stage::CompileSchema, &config.schema_path);
    let compiled = compiler.compile(&schema, EncodingRule::Ber)?;

    enter(Stage::Decode, &config.cdr_path);
    let record = decode_record(&compiled, &config.root_type, payload)?;

    enter(Stage::Render, &config.output_path);
    let report = render_with(&record, &config.render).map_err(|err| {
        IoError::new("serialize report for", &config.output_path, err.into())
    })?;
    Ok(report)
}

/// Runs one CDR file through every stage, stopping at the first failure.
/// Nothing is written unless every earlier stage succeeded.
pub async fn process<C>(config: &PipelineConfig, compiler: &C) -> Result<Outcome, PipelineError>
where
    C: SchemaCompiler + Clone + Send + 'static,
{
    enter(Stage::Read, &config.cdr_path);
    let raw = tokio::fs::read(&config.cdr_path)
        .await
        .map_err(|source| IoError::new("read", &config.cdr_path, source))?;
    let raw = Bytes::from(raw);

    enter(Stage::Decompress, &config.cdr_path);
    let envelope = detect_envelope(&raw);
    let payload = gate(raw).await?;
    let payload_len = payload.len();

    enter(Stage::SanitizeSchema, &config.schema_path);
    let source = tokio::fs::read_to_string(&config.schema_path)
        .await
        .map_err(|source| SchemaError::Unreadable {
            path: config.schema_path.clone(),
            source,
        })?;

    let report = {
        let config = config.clone();
        let compiler = compiler.clone();
        tokio::task::spawn_blocking(move || decode_and_render(&config, &compiler, &source, &payload))
    }
    .await
    .map_err(|err| IoError::new("decode", &config.cdr_path, io::Error::other(err)))??;

    enter(Stage::Persist, &config.output_path);
    persist(&report, &config.output_path).await?;

    Ok(Outcome {
        envelope,
        payload_len,
        report_len: report.len(),
        output_path: config.output_path.clone(),
    })
}
