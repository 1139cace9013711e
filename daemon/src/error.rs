use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config file parsing error: {0}")]
    ConfigFileParsingError(#[from] toml::de::Error),
    #[error("Tokio error: {0}")]
    TokioError(#[from] tokio::io::Error),
    #[error("Couldn't bind to {address}: {source}")]
    BindError {
        address: String,
        source: tokio::io::Error,
    },
}
