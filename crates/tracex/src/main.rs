mod client;
mod import;
mod output;
mod protocol;
mod query_server;
mod telemetry;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracex_core::config::Config;
use tracex_core::query::TracesRequest;
use tracex_core::time::{TimeWindow, parse_time_or_relative};
use tracex_store::Store;

use crate::client::QueryClient;
use crate::output::{print_status_human, print_traces_human};
use crate::protocol::{ApiRequest, ApiResponse};
use crate::query_server::QueryState;
use crate::telemetry::{
    SelfObserveMode, TelemetryConfig, init_cli_tracing, init_run_tracing, shutdown_tracing,
};

#[derive(Parser, Debug)]
#[command(name = "tracex")]
#[command(about = "Local trace explorer with timeline breakdowns")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    uds: Option<PathBuf>,

    #[arg(long, global = true)]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the query servers")]
    Serve {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        query_tcp_addr: Option<String>,
        #[arg(long)]
        query_http_addr: Option<String>,
        #[arg(long)]
        query_uds_path: Option<PathBuf>,
    },
    #[command(about = "Load spans, errors and occurrences from an NDJSON file")]
    Import {
        file: PathBuf,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    #[command(about = "Find traces and show their breakdowns")]
    Traces {
        #[arg(long = "query", short = 'q', help = "Span query; repeat to require several")]
        queries: Vec<String>,
        #[arg(long)]
        suggested_query: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        slices: Option<u32>,
        #[arg(long)]
        per_trace: Option<usize>,
    },
    #[command(about = "Show store counts")]
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            db_path,
            query_tcp_addr,
            query_http_addr,
            query_uds_path,
        } => {
            let telemetry_cfg = TelemetryConfig {
                self_observe: SelfObserveMode::from_env(),
            };
            run_server(
                db_path,
                query_tcp_addr,
                query_http_addr,
                query_uds_path,
                telemetry_cfg,
            )
            .await
        }
        Commands::Import { file, db_path } => {
            init_cli_tracing();
            let mut cfg = Config::load().context("load config")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            let store = Store::open(&cfg.db_path)?;
            let summary = import::import_file(&store, &file)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "spans": summary.spans,
                        "errors": summary.errors,
                        "occurrences": summary.occurrences,
                        "skipped": summary.skipped,
                    })
                );
            } else {
                println!(
                    "imported spans={} errors={} occurrences={} skipped={}",
                    summary.spans, summary.errors, summary.occurrences, summary.skipped
                );
            }
            Ok(())
        }
        Commands::Traces {
            queries,
            suggested_query,
            since,
            until,
            limit,
            slices,
            per_trace,
        } => {
            init_cli_tracing();
            let cfg = Config::load().context("load config")?;
            let mut client = QueryClient::connect(cli.uds, cli.addr).await?;
            let req = TracesRequest {
                queries,
                suggested_query,
                window: parse_window(since, until)?,
                limit,
                breakdown_slices: slices.unwrap_or(cfg.default_slices),
                max_spans_per_trace: per_trace.unwrap_or(cfg.max_spans_per_trace),
            };
            let response = client.request(ApiRequest::Traces(req)).await?;
            print_response(response, cli.json)
        }
        Commands::Status => {
            init_cli_tracing();
            let mut client = QueryClient::connect(cli.uds, cli.addr).await?;
            let response = client.request(ApiRequest::Status).await?;
            print_response(response, cli.json)
        }
    }
}

async fn run_server(
    db_path: Option<PathBuf>,
    query_tcp_addr: Option<String>,
    query_http_addr: Option<String>,
    query_uds_path: Option<PathBuf>,
    telemetry_cfg: TelemetryConfig,
) -> anyhow::Result<()> {
    let mut cfg = Config::load().context("load config")?;
    if let Some(v) = db_path {
        cfg.db_path = v;
    }
    if let Some(v) = query_tcp_addr {
        cfg.query_tcp_addr = v;
    }
    if let Some(v) = query_http_addr {
        cfg.query_http_addr = v;
    }
    if let Some(v) = query_uds_path {
        cfg.uds_path = v;
    }

    let store = Store::open(&cfg.db_path)?;
    init_run_tracing(telemetry_cfg, Some(store.clone()));

    eprintln!("tracex serve");
    eprintln!("  db: {}", cfg.db_path.display());
    eprintln!("  query uds: {}", cfg.uds_path.display());
    eprintln!("  query tcp: {}", cfg.query_tcp_addr);
    eprintln!("  query http: {}", cfg.query_http_addr);
    eprintln!(
        "  query timeout: {}",
        humantime::format_duration(cfg.query_timeout)
    );

    let state = QueryState::new(store, &cfg);

    let query_task = tokio::spawn(query_server::run_query_server(
        state.clone(),
        cfg.uds_path.clone(),
        cfg.query_tcp_addr
            .parse()
            .with_context(|| format!("parse query tcp addr {}", cfg.query_tcp_addr))?,
    ));

    let query_http_task = tokio::spawn(query_server::run_query_http_server(
        state,
        cfg.query_http_addr
            .parse()
            .with_context(|| format!("parse query http addr {}", cfg.query_http_addr))?,
    ));

    tokio::select! {
        res = query_task => {
            res??;
        }
        res = query_http_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    shutdown_tracing();
    Ok(())
}

fn parse_window(since: Option<String>, until: Option<String>) -> anyhow::Result<TimeWindow> {
    let since = since.map(|v| parse_time_or_relative(&v)).transpose()?;
    let until = until.map(|v| parse_time_or_relative(&v)).transpose()?;
    Ok(TimeWindow { since, until })
}

fn print_response(response: ApiResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        ApiResponse::Traces(v) => print_traces_human(&v),
        ApiResponse::Status(v) => print_status_human(&v),
        ApiResponse::Error(e) => eprintln!("error: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_window_accepts_open_ends() {
        let window = parse_window(None, Some("2026-02-01T00:00:00Z".into())).unwrap();
        assert!(window.since.is_none());
        assert_eq!(
            window.until.unwrap().to_rfc3339(),
            "2026-02-01T00:00:00+00:00"
        );
        assert!(parse_window(Some("yesterday-ish".into()), None).is_err());
    }

    #[test]
    fn traces_flags_parse() {
        let cli = Cli::try_parse_from([
            "tracex",
            "traces",
            "-q",
            "span.op:db*",
            "--query",
            "project:web",
            "--slices",
            "20",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Traces {
            queries, slices, ..
        } = cli.command
        else {
            panic!("expected traces command");
        };
        assert_eq!(queries, vec!["span.op:db*", "project:web"]);
        assert_eq!(slices, Some(20));
    }
}
