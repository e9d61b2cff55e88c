//! testproxy-shim CLI

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use bytes::Bytes;
use testproxy_shim::config::ShimConfig;
use testproxy_shim::session::ProxyController;
use testproxy_shim::transport::{NetworkTransport, RoutedTransport, Transport};
use tracing::{error, info};

fn usage() -> ! {
    eprintln!("testproxy-shim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: testproxy-shim [--config <file>] <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  start                        Start a session, print its recording id");
    eprintln!("  stop <recording-id>          Stop a session, saving unless told otherwise");
    eprintln!("  send <METHOD> <URL> [BODY]   Send one request, via the proxy if enabled");
    eprintln!();
    eprintln!("Without --config, settings come from USE_PROXY, PROXY_HOST, PROXY_PORT,");
    eprintln!("PROXY_MODE, PROXY_RECORDING_FILE and related variables.");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = PathBuf::from(args.remove(i + 1));
            args.remove(i);
            Some(path)
        }
        Some(_) => usage(),
        None => None,
    };

    if args.is_empty() {
        usage();
    }

    if let Err(e) = run(config_path, &args).await {
        error!("{e:#}");
        process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>, args: &[String]) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => ShimConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ShimConfig::from_env().context("reading proxy environment")?,
    };

    match args[0].as_str() {
        "start" => {
            let mut session = config.session_config()?;
            let controller = ProxyController::from_config(&config)?;
            let recording_id = controller.start(&mut session).await?;
            println!("{recording_id}");
        }
        "stop" => {
            let Some(recording_id) = args.get(1) else {
                usage();
            };
            let mut session = config.session_config()?;
            session.attach(recording_id.as_str())?;
            let controller = ProxyController::from_config(&config)?;
            controller
                .stop(&mut session)
                .await
                .context("recording was not saved")?;
        }
        "send" => {
            let (Some(method), Some(url)) = (args.get(1), args.get(2)) else {
                usage();
            };
            let body = args.get(3).cloned().unwrap_or_default();
            send(&config, method, url, body).await?;
        }
        other => {
            eprintln!("Unknown command: {other}");
            usage();
        }
    }

    Ok(())
}

/// Send one request; when proxied, the session is started first and always stopped after
async fn send(config: &ShimConfig, method: &str, url: &str, body: String) -> anyhow::Result<()> {
    let request = hyper::Request::builder()
        .method(method)
        .uri(url)
        .body(Bytes::from(body))
        .context("building request")?;

    let network = NetworkTransport::from_config(config)?;

    if !config.use_proxy {
        let transport = RoutedTransport::from_config(config, None, network)?;
        let response = transport.send(request).await?;
        println!("{}", response.status());
        return Ok(());
    }

    let mut session = config.session_config()?;
    let controller = ProxyController::from_config(config)?;
    controller.start(&mut session).await?;

    let transport = RoutedTransport::from_config(config, Some(&session), network)?;
    let sent = transport.send(request).await;
    let stopped = controller.stop(&mut session).await;

    let response = sent?;
    println!("{}", response.status());
    info!("Response body: {} bytes", response.body().len());

    if let Err(e) = stopped {
        bail!("recording was not saved: {e}");
    }
    Ok(())
}
