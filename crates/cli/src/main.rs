use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diffwatch_controller::NamespaceSet;
use diffwatch_core::Config;
use diffwatch_diff::IgnoreRules;
use diffwatch_kubehub::catalog::CATALOG;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "diffwatch", version, about = "Watch Kubernetes resources and alert on meaningful changes")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Config file (default: $HOME/.diffwatch.yaml)
    #[arg(long = "config", env = "DIFFWATCH_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch every enabled kind until SIGINT/SIGTERM
    Run,
    /// List the built-in kind catalog and custom resources
    Kinds,
    /// Print the namespace watch set
    Namespaces,
    /// Diff two YAML/JSON documents with the configured ignore rules
    Diff {
        previous: PathBuf,
        current: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("DIFFWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Listener address for the Prometheus exporter, if one is configured and valid.
fn metrics_listener(raw: Option<&str>) -> Option<SocketAddr> {
    let Some(addr) = raw.map(str::trim).filter(|a| !a.is_empty()) else {
        debug!("DIFFWATCH_METRICS_ADDR not set; metrics exporter disabled");
        return None;
    };
    match addr.parse::<SocketAddr>() {
        Ok(sock) => Some(sock),
        Err(e) => {
            warn!(addr = %addr, error = %e, "invalid DIFFWATCH_METRICS_ADDR; expected host:port");
            None
        }
    }
}

fn init_metrics() {
    let raw = std::env::var("DIFFWATCH_METRICS_ADDR").ok();
    let Some(sock) = metrics_listener(raw.as_deref()) else { return };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(_) => info!(addr = %sock, "Prometheus metrics exporter listening"),
        Err(e) => warn!(addr = %sock, error = %e, "failed to install metrics exporter"),
    }
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "installing Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "installing SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received; shutting down"),
        _ = term => info!("SIGTERM received; shutting down"),
    }
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_document(&text).with_context(|| format!("parsing {}", path.display()))
}

/// YAML is a superset of JSON, so one parser covers both.
fn parse_document(text: &str) -> Result<serde_json::Value> {
    Ok(serde_yaml::from_str::<serde_json::Value>(text)?)
}

#[derive(Serialize)]
struct KindRow<'a> {
    flag: &'a str,
    kind: &'a str,
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    enabled: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => {
            init_metrics();
            cfg.validate()?;
            let handler = diffwatch_notify::from_config(&cfg.handler)?;
            info!(handler = handler.name(), "starting diffwatch");
            let client = diffwatch_kubehub::get_kube_client().await?;
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = stop_tx.send(true);
            });
            diffwatch_controller::run(client, &cfg, handler, stop_rx).await?;
        }
        Commands::Kinds => {
            let flags = cfg.resource.entries();
            let rows: Vec<KindRow> = CATALOG
                .iter()
                .map(|e| KindRow {
                    flag: e.flag,
                    kind: e.tag,
                    api_version: e.api_version,
                    enabled: flags.iter().any(|(f, on)| *f == e.flag && *on),
                })
                .collect();
            match cli.output {
                Output::Human => {
                    for r in &rows {
                        let mark = if r.enabled { "on" } else { "-" };
                        println!("{:<22} {:<24} {:<30} {}", r.flag, r.kind, r.api_version, mark);
                    }
                    for key in &cfg.custom_resources {
                        println!("{:<22} {:<55} on", "custom", key);
                    }
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Kinds<'a> { builtin: Vec<KindRow<'a>>, custom: &'a [String] }
                    println!("{}", serde_json::to_string_pretty(&Kinds { builtin: rows, custom: &cfg.custom_resources })?);
                }
            }
        }
        Commands::Namespaces => {
            let set = if NamespaceSet::needs_listing(&cfg.namespaces) {
                let client = diffwatch_kubehub::get_kube_client().await?;
                diffwatch_controller::watch_namespaces(client, &cfg).await?
            } else {
                NamespaceSet::compute(&cfg.namespaces, &[])
            };
            match cli.output {
                Output::Human => {
                    for ns in set.iter() {
                        println!("{}", ns);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&set.iter().collect::<Vec<_>>())?),
            }
        }
        Commands::Diff { previous, current } => {
            let prev = read_document(&previous)?;
            let cur = read_document(&current)?;
            let rules = IgnoreRules::new(&cfg.diff.ignore_path);
            match cli.output {
                Output::Human => {
                    let patch = diffwatch_diff::diff(&prev, &cur, &rules);
                    if !patch.is_empty() {
                        println!("{}", patch);
                    }
                }
                Output::Json => {
                    let ops = diffwatch_diff::compare(&prev, &cur, &rules);
                    let summary = diffwatch_diff::summarize(&ops);
                    info!(adds = summary.adds, updates = summary.updates, removes = summary.removes, "diff computed");
                    println!("{}", serde_json::to_string(&ops)?);
                }
            }
        }
    }

    Ok(())
}
