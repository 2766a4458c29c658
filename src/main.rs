//! verdict - evaluate one request and print the verdict as JSON
//!
//! Usage: verdict [--config <file>] [--audit-csv <file>] [request.json|request.yaml]
//!
//! Reads the request from stdin when no path is given.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdict_engine::config::{AppConfig, LogConfig};
use verdict_engine::{EvaluationRequest, VerdictPipeline, WireRequest};

/// Evaluate one request against the consensus and invariant engines
#[derive(Parser, Debug)]
#[command(name = "verdict", version, about)]
struct Args {
    /// Config file layered over the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the downgrade log to this CSV file after evaluation
    #[arg(long)]
    audit_csv: Option<PathBuf>,

    /// Request file (.json, .yaml or .yml); stdin when omitted
    request: Option<PathBuf>,
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.level.as_str()));
    // stdout carries the verdict, logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_request(path: Option<&Path>) -> Result<WireRequest> {
    let (text, yaml) = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            let yaml = matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            (text, yaml)
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read request from stdin")?;
            let yaml = !text.trim_start().starts_with('{');
            (text, yaml)
        }
    };

    if yaml {
        serde_yaml::from_str(&text).context("Failed to parse YAML request")
    } else {
        serde_json::from_str(&text).context("Failed to parse JSON request")
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config.log);
    info!("⚙️ Config: {}", config);

    let settings = config.engine_settings()?;
    let (pipeline, audit) = VerdictPipeline::with_audit(&settings)?;

    let request = EvaluationRequest::try_from(read_request(args.request.as_deref())?)?;
    let verdict = pipeline.evaluate(&request);

    println!(
        "{}",
        serde_json::to_string_pretty(&verdict).context("Failed to encode verdict")?
    );

    if let Some(path) = &args.audit_csv {
        audit.export_csv(path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_accept_flags_and_request_path() {
        let args = Args::try_parse_from([
            "verdict",
            "--config",
            "local.yaml",
            "--audit-csv",
            "audit.csv",
            "request.json",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.yaml")));
        assert_eq!(args.audit_csv, Some(PathBuf::from("audit.csv")));
        assert_eq!(args.request, Some(PathBuf::from("request.json")));
    }

    #[test]
    fn test_args_default_to_stdin() {
        let args = Args::try_parse_from(["verdict"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.request.is_none());
    }

    #[test]
    fn test_args_reject_unknown_flag_and_second_request() {
        assert!(Args::try_parse_from(["verdict", "--fast"]).is_err());
        assert!(Args::try_parse_from(["verdict", "a.json", "b.json"]).is_err());
        assert!(Args::try_parse_from(["verdict", "--config"]).is_err());
    }
}
