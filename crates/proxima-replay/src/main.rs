//! # proxima-replay
//!
//! Replays a recorded radio trace through the beacon engine.
//!
//! ## Running
//!
//! ```bash
//! # Deterministic, on the trace's own clock
//! proxima-replay --config proxima.toml trace.jsonl > events.jsonl
//!
//! # Paced by the wall clock through the async runtime
//! proxima-replay --realtime trace.jsonl
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use proxima_core::EngineConfig;
use tracing::info;

use proxima_replay::{load_config, logging, read_trace, replay, replay_realtime};

/// Replay a JSON-lines beacon trace and print engine events to stdout.
#[derive(Debug, Parser)]
#[command(name = "proxima-replay", version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults to the platform config path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trace file, one JSON object per line.
    #[arg(required_unless_present = "write_default_config")]
    trace: Option<PathBuf>,

    /// Pace lines by wall-clock time through the async runtime.
    #[arg(long)]
    realtime: bool,

    /// Log JSON to rolling files in addition to stderr.
    #[arg(long)]
    production: bool,

    /// Directory for production log files.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Write the default configuration to FILE and exit.
    #[arg(long, value_name = "FILE")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.production, cli.log_dir.as_deref())?;

    if let Some(path) = &cli.write_default_config {
        EngineConfig::default()
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote default configuration");
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let Some(trace_path) = cli.trace else {
        anyhow::bail!("no trace file given");
    };
    let file = File::open(&trace_path)
        .with_context(|| format!("opening trace {}", trace_path.display()))?;
    let lines = read_trace(BufReader::new(file))
        .with_context(|| format!("reading trace {}", trace_path.display()))?;

    info!(
        trace = %trace_path.display(),
        lines = lines.len(),
        realtime = cli.realtime,
        "starting replay"
    );

    let summary = if cli.realtime {
        replay_realtime(config, lines, io::stdout()).await?
    } else {
        replay(config, lines, &mut io::stdout().lock())?
    };

    if summary.rejected > 0 {
        info!(rejected = summary.rejected, "some operations were refused");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_trace_required_without_write_default_config() {
        assert!(Cli::try_parse_from(["proxima-replay"]).is_err());
        let cli =
            Cli::try_parse_from(["proxima-replay", "--write-default-config", "out.toml"]).unwrap();
        assert!(cli.trace.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "proxima-replay",
            "-c",
            "proxima.toml",
            "--realtime",
            "--production",
            "trace.jsonl",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("proxima.toml")));
        assert_eq!(cli.trace, Some(PathBuf::from("trace.jsonl")));
        assert!(cli.realtime && cli.production);
    }
}
