//! Decodes telecom call detail records: undo gzip framing, repair the
//! vendor schema, compile it, decode the BER record against it and write
//! a report.

pub mod codec;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod sanitize;

pub use error::PipelineError;
pub use pipeline::{Outcome, PipelineConfig, process};

// re-export ber_schema, since we use its types in our API
pub use ber_schema;
