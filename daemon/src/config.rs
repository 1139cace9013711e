use log::warn;
use serde::{Deserialize, Serialize};

use cdr_decoder::PipelineConfig;
use cdr_decoder::pipeline::DEFAULT_ROOT_TYPE;
use cdr_decoder::render::{RenderOptions, ReportFormat};
use cdr_decoder::sanitize::SanitizeMode;

use crate::error::DaemonError;

/// The structure of a valid daemon configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// CDR file decoded on each request
    pub cdr_path: String,
    /// ASN.1 module describing the CDR
    pub schema_path: String,
    /// Where the report is written
    pub output_path: String,
    /// Listening address
    pub host: String,
    /// Listening port
    pub port: u16,
    /// Type each record is decoded as
    pub root_type: String,
    /// How CHOICE blocks are found when repairing the schema
    pub sanitize_mode: SanitizeMode,
    /// Report format, "text" or "json"
    pub format: ReportFormat,
    /// Line width of text reports
    pub line_width: usize,
    /// Seconds a request may take before it's abandoned, 0 for no limit
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cdr_path: "CDR/AP65_120250311-094603-00000002.dat%3A56077".to_string(),
            schema_path: "estructuras_ASN1/GprsHuaweiEM20.CallEventRecord".to_string(),
            output_path: "Decodificados/CDR_GprsHuaweiEM20.txt".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            root_type: DEFAULT_ROOT_TYPE.to_string(),
            sanitize_mode: SanitizeMode::default(),
            format: ReportFormat::default(),
            line_width: RenderOptions::default().width,
            request_timeout_secs: 60,
        }
    }
}

impl Config {
    pub fn pipeline(&self) -> PipelineConfig {
        let mut pipeline = PipelineConfig::new(&self.cdr_path, &self.schema_path, &self.output_path);
        pipeline.root_type = self.root_type.clone();
        pipeline.sanitize_mode = self.sanitize_mode;
        pipeline.render.format = self.format;
        pipeline.render.width = self.line_width;
        pipeline
    }
}

pub async fn parse_config<P>(path: P) -> Result<Config, DaemonError>
where
    P: AsRef<std::path::Path>,
{
    if let Ok(config_file) = tokio::fs::read_to_string(&path).await {
        Ok(toml::from_str(&config_file).map_err(DaemonError::ConfigFileParsingError)?)
    } else {
        warn!("unable to read config file, using default config");
        Ok(Config::default())
    }
}

pub struct Args {
    pub config_path: String,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!("Usage: {} /path/to/config/file", args[0]);
        std::process::exit(1);
    }
    Args {
        config_path: args[1].clone(),
    }
}
