//! HTTP trigger for the CDR decoder: one request decodes the configured
//! file and writes its report.

pub mod config;
pub mod error;
pub mod server;
