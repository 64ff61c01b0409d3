use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use feature_stream::{FeatureStream, StreamError, StreamOptions, DEFAULT_ARRAY_KEY};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "feature-stream",
    version,
    about = "Stream records out of a large JSON array document as JSON lines"
)]
struct StreamCli {
    /// Input document; '-' or no argument reads stdin
    input: Option<PathBuf>,

    /// Root member holding the record array
    #[arg(long, default_value = DEFAULT_ARRAY_KEY)]
    key: String,

    /// Treat the document itself as the array (ignores --key)
    #[arg(long, default_value_t = false)]
    root_array: bool,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,

    /// Only print the summary, not the records
    #[arg(long, default_value_t = false)]
    count_only: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FEATURE_STREAM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(StreamCli::parse()) {
        eprintln!("{}: {err}", env!("CARGO_PKG_NAME"));
        process::exit(1);
    }
}

fn run(cli: StreamCli) -> Result<(), StreamError> {
    let options = StreamOptions {
        array_key: (!cli.root_array).then(|| cli.key.clone()),
        limit: cli.limit,
        ..StreamOptions::default()
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let stats = match cli.input {
        Some(path) if path.as_os_str() != "-" => {
            let records = FeatureStream::<_, Value>::open(&path, options)?;
            emit(records, &mut out, cli.count_only)?
        }
        _ => {
            let stdin = io::stdin();
            let records = FeatureStream::<_, Value>::new(BufReader::new(stdin.lock()), options);
            emit(records, &mut out, cli.count_only)?
        }
    };
    out.flush()?;

    eprintln!(
        "{} records emitted, {} skipped, {} bytes read, largest record {} bytes",
        stats.emitted, stats.skipped, stats.bytes_read, stats.peak_record_bytes
    );
    Ok(())
}

fn emit<R, W>(
    mut records: FeatureStream<R, Value>,
    out: &mut W,
    count_only: bool,
) -> Result<feature_stream::StreamStats, StreamError>
where
    R: io::BufRead,
    W: Write,
{
    for record in records.by_ref() {
        let record = record?;
        if count_only {
            continue;
        }
        serde_json::to_writer(&mut *out, &record).map_err(io::Error::from)?;
        out.write_all(b"\n")?;
    }
    Ok(records.stats())
}
