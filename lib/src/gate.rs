//! Detects gzip framing on raw CDR input and undoes it.

use std::io;

use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use log::{error, info};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use ber_schema::hex;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// how much of a bad input to echo back in diagnostics
const LEADING_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Gzip,
    Passthrough,
}

#[derive(Debug, Error)]
#[error("couldn't decompress gzip input starting {leading}: {source}")]
pub struct DecompressionError {
    /// The first bytes of the input, hex encoded
    pub leading: String,
    #[source]
    pub source: io::Error,
}

pub fn detect_envelope(raw: &[u8]) -> Envelope {
    if raw.starts_with(&GZIP_MAGIC) {
        Envelope::Gzip
    } else {
        Envelope::Passthrough
    }
}

// Decodes one gzip member after another. NUL bytes between and after
// members are padding some collectors add and are skipped.
async fn gunzip(raw: &[u8]) -> io::Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        let before = rest.len();
        let mut decoder = GzipDecoder::new(rest);
        decoder.multiple_members(false);
        decoder.read_to_end(&mut decompressed).await?;
        rest = decoder.into_inner();
        if rest.len() == before {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "gzip member consumed no input",
            ));
        }
        let padding = rest.iter().take_while(|b| **b == 0).count();
        rest = &rest[padding..];
    }
    Ok(decompressed)
}

/// Returns the BER payload inside `raw`: decompressed if it's gzip-framed,
/// unchanged otherwise. Multi-member gzip streams are concatenated.
pub async fn gate(raw: Bytes) -> Result<Bytes, DecompressionError> {
    if detect_envelope(&raw) == Envelope::Passthrough {
        info!("input not gzip-framed, using as-is ({} bytes)", raw.len());
        return Ok(raw);
    }

    match gunzip(&raw).await {
        Ok(decompressed) => {
            info!(
                "decompressed {} bytes of gzip input into {} bytes",
                raw.len(),
                decompressed.len()
            );
            Ok(Bytes::from(decompressed))
        }
        Err(source) => {
            let leading = hex(&raw[..raw.len().min(LEADING_BYTES)]);
            error!("gzip decompression failed: {source} (input starts {leading})");
            Err(DecompressionError { leading, source })
        }
    }
}
