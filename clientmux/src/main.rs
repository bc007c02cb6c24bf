//! clientmux - demo and configuration entry point

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info};

use clientmux::cli::{Cli, Command};
use clientmux::config::Config;
use clientmux::{Client, LoopbackTransport, Request};

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clientmux")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("clientmux.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(config.log_level_or(cli.log_level.as_deref())).context("Failed to setup logging")?;
    match &config.source {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Demo {
            clients,
            requests,
            listeners,
        }) => cmd_demo(&config, clients, requests, listeners).await,
        Some(Command::Config) => cmd_config(&config),
        None => cmd_demo(&config, 2, 10, 1).await,
    }
}

/// Print the resolved configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Answer every request on the loopback transport with an `ok` echo
async fn echo_responder(transport: Arc<LoopbackTransport>) {
    while let Some((client_id, request)) = transport.next_sent().await {
        let body = json!({"@type": "ok", "request": request.kind, "params": request.params});
        if let Err(e) = transport.reply(client_id, &request, body) {
            tracing::warn!(client_id, error = %e, "echo_responder: reply failed");
        }
    }
}

/// Run clients over the loopback transport and report what each side saw
async fn cmd_demo(config: &Config, clients: usize, requests: usize, listeners: usize) -> Result<()> {
    debug!(clients, requests, listeners, "cmd_demo: called");
    let transport = Arc::new(LoopbackTransport::new());
    let responder = tokio::spawn(echo_responder(transport.clone()));

    let mut handles = Vec::with_capacity(clients);
    for _ in 0..clients {
        let client = Client::builder(transport.clone())
            .from_config(&config.client)
            .build()
            .await
            .context("Failed to build client")?;
        handles.push(client);
    }

    // Every echo is also an update, so each listener should see one per request
    let mut listener_tasks = Vec::new();
    for client in &handles {
        for _ in 0..listeners {
            let mut listener = client.listener();
            let client_id = client.id();
            listener_tasks.push(tokio::spawn(async move {
                let mut seen = 0;
                while seen < requests && listener.recv().await.is_some() {
                    seen += 1;
                }
                (client_id, seen)
            }));
        }
    }

    let started = Instant::now();
    let sends = handles.iter().flat_map(|client| {
        (0..requests).map(move |seq| {
            let client = client.clone();
            async move { client.send(Request::new("ping").with_param("seq", seq as u64)).await }
        })
    });
    let results = join_all(sends).await;
    let elapsed = started.elapsed();

    let total = results.len();
    let ok = results.iter().filter(|result| result.is_ok()).count();
    for e in results.iter().filter_map(|result| result.as_ref().err()) {
        println!("  {} {}", "✗".red(), e);
    }

    let marker = if ok == total { "✓".green() } else { "✗".red() };
    println!(
        "{} {}/{} responses across {} clients in {:?}",
        marker, ok, total, clients, elapsed
    );

    let seen = tokio::time::timeout(Duration::from_secs(5), join_all(listener_tasks))
        .await
        .unwrap_or_default();
    for (client_id, count) in seen.into_iter().flatten() {
        let marker = if count == requests { "✓".green() } else { "✗".red() };
        println!("{} listener on client {} saw {}/{} updates", marker, client_id, count, requests);
    }

    for client in &handles {
        let stats = client.stats();
        println!(
            "  client {}: sent={} received={} timeouts={} pending={}",
            client.id().to_string().bold(),
            stats.requests_sent,
            stats.responses_received,
            stats.timeouts,
            stats.pending_requests
        );
        client.stop().await.context("Failed to stop client")?;
    }
    responder.abort();

    if ok != total {
        return Err(eyre::eyre!("{} of {} requests failed", total - ok, total));
    }
    Ok(())
}
