use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, info};
use serde::{Deserialize, Serialize};

use cdr_decoder::codec::BerCompiler;
use cdr_decoder::{Outcome, PipelineError, process};

use crate::config::Config;

pub struct ServerState {
    pub config: Config,
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub cause: String,
}

#[derive(Debug)]
pub enum TriggerError {
    Pipeline(PipelineError),
    Timeout(Duration),
}

impl TriggerError {
    pub fn status(&self) -> StatusCode {
        match self {
            TriggerError::Pipeline(
                PipelineError::Decompression(_) | PipelineError::Decode(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            TriggerError::Pipeline(PipelineError::Io(_) | PipelineError::Schema(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            TriggerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            TriggerError::Pipeline(err) => ErrorBody {
                kind: err.kind().to_string(),
                cause: err.to_string(),
            },
            TriggerError::Timeout(limit) => ErrorBody {
                kind: "Timeout".to_string(),
                cause: format!("decoding took longer than {}s", limit.as_secs()),
            },
        }
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

async fn run(config: &Config) -> Result<Outcome, TriggerError> {
    let pipeline = config.pipeline();
    let decoding = process(&pipeline, &BerCompiler);
    if config.request_timeout_secs == 0 {
        return decoding.await.map_err(TriggerError::Pipeline);
    }
    let limit = Duration::from_secs(config.request_timeout_secs);
    match tokio::time::timeout(limit, decoding).await {
        Ok(result) => result.map_err(TriggerError::Pipeline),
        Err(_) => Err(TriggerError::Timeout(limit)),
    }
}

/// Decodes the configured CDR file and writes its report
pub async fn decode_cdr(State(state): State<Arc<ServerState>>) -> Result<String, TriggerError> {
    match run(&state.config).await {
        Ok(outcome) => {
            info!(
                "decoded {} ({} bytes) into {}",
                state.config.cdr_path,
                outcome.payload_len,
                outcome.output_path.display()
            );
            Ok(format!(
                "CDR decoded, report written to {}\n",
                outcome.output_path.display()
            ))
        }
        Err(err) => {
            let body = err.body();
            error!("decoding {} failed: {}: {}", state.config.cdr_path, body.kind, body.cause);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_decoder::ber_schema::{Tag, encode_tlv, integer_content};
    use tempfile::{Builder, TempDir};

    const SCHEMA: &str = "Trigger DEFINITIONS IMPLICIT TAGS ::=
BEGIN
CallEventRecord ::= SEQUENCE
{
    recordType  [0] INTEGER,
    servingNode [1] NodeAddress OPTIONAL
}
NodeAddress ::= CHOICE
{
    iPAddress   [0] OCTET STRING OPTIONAL,
    nodeName    [1] IA5String OPTIONAL
}
END
";

    fn make_temp_dir() -> TempDir {
        Builder::new().prefix("server_test").tempdir().unwrap()
    }

    fn state(dir: &TempDir, cdr: &[u8]) -> Arc<ServerState> {
        let cdr_path = dir.path().join("cdr.dat");
        let schema_path = dir.path().join("schema.asn");
        std::fs::write(&cdr_path, cdr).unwrap();
        std::fs::write(&schema_path, SCHEMA).unwrap();
        let config = Config {
            cdr_path: cdr_path.display().to_string(),
            schema_path: schema_path.display().to_string(),
            output_path: dir.path().join("out").join("cdr.txt").display().to_string(),
            ..Config::default()
        };
        Arc::new(ServerState { config })
    }

    fn record() -> Vec<u8> {
        encode_tlv(
            Tag::SEQUENCE,
            true,
            &encode_tlv(Tag::context(0), false, &integer_content(19)),
        )
    }

    #[tokio::test]
    async fn test_decode_writes_report() {
        let dir = make_temp_dir();
        let state = state(&dir, &record());
        let body = decode_cdr(State(state.clone())).await.unwrap();
        assert!(body.contains("cdr.txt"), "{body}");
        let report = std::fs::read_to_string(&state.config.output_path).unwrap();
        assert_eq!(report, "{ recordType 19 }\n");
    }

    #[tokio::test]
    async fn test_decode_failure_is_unprocessable() {
        let dir = make_temp_dir();
        let state = state(&dir, &[0x13, 0x37]);
        let err = decode_cdr(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.body().kind, "DecodeError");
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_unprocessable() {
        let dir = make_temp_dir();
        // a deflate block with the reserved block type
        let corrupt = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff];
        let state = state(&dir, &corrupt);
        let err = decode_cdr(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.body().kind, "DecompressionError");
    }

    #[tokio::test]
    async fn test_missing_schema_is_a_server_error() {
        let dir = make_temp_dir();
        let state = state(&dir, &record());
        let config = Config {
            schema_path: dir.path().join("missing.asn").display().to_string(),
            ..state.config.clone()
        };
        let err = decode_cdr(State(Arc::new(ServerState { config })))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().kind, "SchemaError");
    }

    #[tokio::test]
    async fn test_missing_cdr_is_a_server_error() {
        let dir = make_temp_dir();
        let state = state(&dir, &record());
        let config = Config {
            cdr_path: dir.path().join("missing.dat").display().to_string(),
            ..state.config.clone()
        };
        let err = decode_cdr(State(Arc::new(ServerState { config })))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().kind, "IoError");
    }

    #[test]
    fn test_timeout_body() {
        let err = TriggerError::Timeout(Duration::from_secs(5));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            err.body(),
            ErrorBody {
                kind: "Timeout".to_string(),
                cause: "decoding took longer than 5s".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_error_response_is_json() {
        let dir = make_temp_dir();
        let state = state(&dir, &[0x13, 0x37]);
        let response = decode_cdr(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.kind, "DecodeError");
        assert!(body.cause.starts_with("couldn't decode CallEventRecord"), "{}", body.cause);
    }
}
