//! ftdc CLI
//!
//! Command-line interface for FTDC files:
//! - Extract samples to CSV or JSON lines
//! - Summarize a file (chunks, samples, time span)
//! - Dump metadata documents

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ftdc::output::document_to_json;
use ftdc::{
    CsvEncoder, FtdcReader, JsonLinesEncoder, OutputResult, ReaderOptions, SchemaChangePolicy,
};

#[derive(Parser)]
#[command(name = "ftdc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MongoDB FTDC diagnostic data decoder")]
#[command(
    long_about = "Decode MongoDB Full Time Diagnostic Data Capture files.\nExtract per-second samples to CSV or JSON, inspect file contents, and dump metadata."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract samples to CSV or JSON lines
    Extract {
        /// FTDC file (e.g. metrics.2025-11-13T17-15-32Z-00000)
        file: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(short, long, value_enum, default_value = "csv")]
        format: Format,
        /// Keep samples at or after this time (RFC 3339 or Unix millis)
        #[arg(long)]
        start: Option<String>,
        /// Keep samples strictly before this time (RFC 3339 or Unix millis)
        #[arg(long)]
        end: Option<String>,
        /// Keep only metrics whose path starts with one of these prefixes
        #[arg(short = 'm', long = "metric")]
        metrics: Vec<String>,
        /// Fail when the schema changes between chunks
        #[arg(long)]
        strict_schema: bool,
    },

    /// Summarize an FTDC file
    Info {
        /// FTDC file
        file: PathBuf,
    },

    /// Dump metadata documents as JSON lines
    Metadata {
        /// FTDC file
        file: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Csv,
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ftdc=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            file,
            output,
            format,
            start,
            end,
            metrics,
            strict_schema,
        } => {
            let mut options = ReaderOptions::new();
            if let Some(start) = start {
                options = options.start_time(parse_time(&start)?);
            }
            if let Some(end) = end {
                options = options.end_time(parse_time(&end)?);
            }
            if !metrics.is_empty() {
                options = options
                    .metric_filter(move |path| metrics.iter().any(|m| path.starts_with(m.as_str())));
            }
            if strict_schema {
                options = options.on_schema_change(SchemaChangePolicy::Error);
            }

            let mut reader = FtdcReader::open(&file)?;
            let out = open_output(output.as_deref())?;
            let rows = match format {
                Format::Csv => extract_csv(&mut reader, options, out)?,
                Format::Json => extract_json(&mut reader, options, out)?,
            };
            tracing::info!("wrote {} samples from {}", rows, file.display());
        }

        Commands::Info { file } => {
            let mut reader = FtdcReader::open(&file)?;
            let stats = reader.stats()?;
            println!("{}", stats);
        }

        Commands::Metadata { file, output } => {
            let mut reader = FtdcReader::open(&file)?;
            let mut out = open_output(output.as_deref())?;
            for doc in reader.metadata_documents()? {
                serde_json::to_writer(&mut out, &document_to_json(&doc))?;
                writeln!(out)?;
            }
            out.flush()?;
        }
    }

    Ok(())
}

fn extract_csv(
    reader: &mut FtdcReader<io::BufReader<File>>,
    options: ReaderOptions,
    out: Box<dyn Write>,
) -> OutputResult<u64> {
    let mut encoder = CsvEncoder::new(out);
    for sample in reader.iter_samples(options) {
        encoder.write_sample(&sample?)?;
    }
    let rows = encoder.rows();
    encoder.finish()?;
    Ok(rows)
}

fn extract_json(
    reader: &mut FtdcReader<io::BufReader<File>>,
    options: ReaderOptions,
    out: Box<dyn Write>,
) -> OutputResult<u64> {
    let mut encoder = JsonLinesEncoder::new(out);
    for sample in reader.iter_samples(options) {
        encoder.write_sample(&sample?)?;
    }
    let rows = encoder.rows();
    encoder.finish()?;
    Ok(rows)
}

fn open_output(path: Option<&std::path::Path>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Accepts RFC 3339 ("2025-11-13T17:15:32Z") or Unix epoch milliseconds
fn parse_time(input: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(millis) = input.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| format!("timestamp out of range: {}", input));
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid time '{}': {}", input, e))
}
