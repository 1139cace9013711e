use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cdr_decoder::codec::BerCompiler;
use cdr_decoder::pipeline::DEFAULT_ROOT_TYPE;
use cdr_decoder::render::ReportFormat;
use cdr_decoder::sanitize::SanitizeMode;
use cdr_decoder::{PipelineConfig, process};
use clap::Parser;
use log::{debug, error, info};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(
        short = 's',
        long,
        default_value = "estructuras_ASN1/GprsHuaweiEM20.CallEventRecord",
        help = "ASN.1 module describing the records"
    )]
    schema: PathBuf,

    #[arg(short = 'p', long, help = "A CDR file or directory of CDR files")]
    path: PathBuf,

    #[arg(
        short = 'o',
        long,
        default_value = "Decodificados",
        help = "Directory reports are written to"
    )]
    output_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_ROOT_TYPE, help = "Type each record is decoded as")]
    root_type: String,

    #[arg(long, value_enum, default_value = "text", help = "Output format")]
    format: OutputFormat,

    #[arg(long, help = "Match braces when finding CHOICE blocks in the schema")]
    nested_sanitizer: bool,

    #[arg(long, default_value_t = 80, help = "Line width of text reports")]
    width: usize,

    #[arg(short, long, help = "Only print warnings/errors to stdout")]
    quiet: bool,

    #[arg(short, long, help = "Show debug messages")]
    debug: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => ReportFormat::Text,
            OutputFormat::Json => ReportFormat::Json,
        }
    }
}

impl Args {
    fn pipeline_for(&self, cdr_path: &Path) -> PipelineConfig {
        let format = ReportFormat::from(self.format);
        let mut report_name = cdr_path.file_name().unwrap_or_default().to_os_string();
        report_name.push(".");
        report_name.push(format.extension());

        let mut config = PipelineConfig::new(
            cdr_path,
            &self.schema,
            self.output_dir.join(report_name),
        );
        config.root_type = self.root_type.clone();
        if self.nested_sanitizer {
            config.sanitize_mode = SanitizeMode::Nested;
        }
        config.render.format = format;
        config.render.width = self.width;
        config
    }
}

// every regular file under `path`, leaving out reports we've written
fn cdr_files(path: &Path, output_dir: &Path) -> (Vec<PathBuf>, usize) {
    let mut files = Vec::new();
    let mut unreadable = 0;
    // `./out` and `out` name the same directory
    let output_dir = output_dir.canonicalize().ok();
    for maybe_entry in WalkDir::new(path).sort_by_file_name() {
        let entry = match maybe_entry {
            Ok(entry) => entry,
            Err(err) => {
                error!("failed to open dir entry: {err}");
                unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_report = output_dir.as_deref().is_some_and(|output_dir| {
            entry
                .path()
                .canonicalize()
                .is_ok_and(|path| path.starts_with(output_dir))
        });
        if is_report {
            debug!("skipping report {}", entry.path().display());
            continue;
        }
        files.push(entry.into_path());
    }
    (files, unreadable)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.debug {
        log::LevelFilter::Debug
    } else if args.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    if let Err(err) = simple_logger::SimpleLogger::new()
        .with_colors(true)
        .without_timestamps()
        .with_level(level)
        .init()
    {
        eprintln!("couldn't set up logging: {err}");
    }

    let (files, mut failed) = cdr_files(&args.path, &args.output_dir);
    let mut decoded = 0;
    for path in &files {
        info!("**** Decoding {}", path.display());
        let config = args.pipeline_for(path);
        match process(&config, &BerCompiler).await {
            Ok(outcome) => {
                info!(
                    "{}: {} bytes of BER, wrote {} bytes to {}",
                    path.display(),
                    outcome.payload_len,
                    outcome.report_len,
                    outcome.output_path.display()
                );
                decoded += 1;
            }
            Err(err) => {
                error!("{}: {}: {err}", path.display(), err.kind());
                failed += 1;
            }
        }
    }

    info!("{decoded} files decoded, {failed} failed");
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_named_after_input() {
        let args = Args::parse_from(["cdr-decoder-check", "-p", "in", "--format", "json"]);
        let config = args.pipeline_for(Path::new("in/CDR_0001.dat"));
        assert_eq!(
            config.output_path,
            PathBuf::from("Decodificados/CDR_0001.dat.json")
        );
        assert_eq!(config.sanitize_mode, SanitizeMode::Legacy);
        assert_eq!(config.root_type, "CallEventRecord");
    }

    #[test]
    fn test_nested_sanitizer_flag() {
        let args = Args::parse_from([
            "cdr-decoder-check",
            "-p",
            "in",
            "--nested-sanitizer",
            "--width",
            "120",
        ]);
        let config = args.pipeline_for(Path::new("in/a.dat"));
        assert_eq!(config.sanitize_mode, SanitizeMode::Nested);
        assert_eq!(config.render.width, 120);
        assert_eq!(config.output_path, PathBuf::from("Decodificados/a.dat.txt"));
    }

    #[test]
    fn test_reports_are_skipped_however_the_directory_is_spelled() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("cdrs")).unwrap();
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("cdrs").join("a.dat"), [0x30, 0x00]).unwrap();
        std::fs::write(dir.path().join("out").join("a.dat.txt"), "{ }\n").unwrap();

        let roundabout = dir.path().join("cdrs").join("..").join("out");
        let (files, unreadable) = cdr_files(dir.path(), &roundabout);
        assert_eq!(files, vec![dir.path().join("cdrs").join("a.dat")]);
        assert_eq!(unreadable, 0);
    }

    #[test]
    fn test_missing_output_dir_skips_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.dat"), [0x30, 0x00]).unwrap();
        let (files, _) = cdr_files(dir.path(), &dir.path().join("Decodificados"));
        assert_eq!(files, vec![dir.path().join("a.dat")]);
    }
}
