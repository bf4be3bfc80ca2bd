use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use streamload_common::config::DriverConfig;
use streamload_core::{metrics_channel, RequestDriver, RequestParams, StaticProvider};

#[derive(Parser, Debug)]
#[command(name = "streamload", version, about = "One virtual user against a streaming inference endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run(RunArgs),
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Endpoint the driver POSTs to
    #[arg(short, long)]
    url: String,
    /// JSON request body
    #[arg(short, long, conflicts_with = "body_file")]
    body: Option<String>,
    /// File holding the JSON request body
    #[arg(long)]
    body_file: Option<PathBuf>,
    /// Extra header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
    /// Input token count reported with every success
    #[arg(long, default_value_t = 0)]
    input_tokens: u64,
    #[arg(long, default_value_t = 0)]
    user_id: usize,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(short, long)]
    duration_secs: Option<u64>,
    /// Dump the process counters to stderr on exit
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    streamload_obs::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = DriverConfig::load().context("loading driver configuration")?;
    let mut params = RequestParams::new(args.url.clone(), read_body(&args)?, args.input_tokens);
    for (name, value) in &args.headers {
        params = params.with_header(name.clone(), value.clone());
    }

    let (sink, mut events) = metrics_channel(config.metrics_buffer);
    let driver = RequestDriver::from_config(args.user_id, Arc::new(StaticProvider::new(params)), Arc::new(sink), &config)?;
    tracing::info!(user_id = args.user_id, url = %args.url, "driver running");

    // Events go to stdout as JSON lines, logs stay on stderr.
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            }
            printed += 1;
        }
        printed
    });

    wait_for_shutdown(args.duration_secs).await;
    driver.stop().await;
    let printed = printer.await.context("event printer panicked")?;
    tracing::info!(user_id = args.user_id, events = printed, "driver stopped");

    if args.print_metrics {
        eprint!("{}", streamload_obs::gather_text());
    }
    Ok(())
}

fn read_body(args: &RunArgs) -> Result<serde_json::Value> {
    let text = match (&args.body, &args.body_file) {
        (Some(body), _) => body.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&text).context("request body is not valid JSON")
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw.split_once(':').ok_or_else(|| format!("expected NAME:VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

async fn wait_for_shutdown(duration_secs: Option<u64>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    match duration_secs {
        Some(secs) => tokio::select! {
            _ = ctrl_c => {}
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        },
        None => ctrl_c.await,
    }
}
