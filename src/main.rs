use std::path::PathBuf;

use clap::Parser;

use tunnel_proxy::certs::CertStore;
use tunnel_proxy::config::{load_config, validate_config, ProxyConfig};
use tunnel_proxy::lifecycle::{start, wait_for_signal, Shutdown};
use tunnel_proxy::observability::init_logging;

#[derive(Parser, Debug)]
#[command(name = "tunnel-proxy")]
#[command(about = "HTTP CONNECT tunnel proxy with echo and mutual-TLS listeners", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Plain HTTP echo port.
    #[arg(long)]
    port: Option<u16>,

    /// Mutual-TLS echo port.
    #[arg(long)]
    tls_port: Option<u16>,

    /// CONNECT proxy port.
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Require client certificates to chain to the mTLS certificate
    /// (retrievable from /cert on the plain port).
    #[arg(long)]
    verify_client_cert: bool,

    /// Dial every tunnel target over plain TCP, even on port 443.
    #[arg(long)]
    no_tls_dial: bool,

    /// Serve the CONNECT listener over TLS.
    #[arg(long)]
    proxy_tls: bool,
}

fn with_port(bind_address: &str, port: u16) -> String {
    match bind_address.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("0.0.0.0:{}", port),
    }
}

fn apply_overrides(config: &mut ProxyConfig, args: &Args) {
    if let Some(port) = args.port {
        config.http.bind_address = with_port(&config.http.bind_address, port);
    }
    if let Some(port) = args.tls_port {
        config.https.bind_address = with_port(&config.https.bind_address, port);
    }
    if let Some(port) = args.proxy_port {
        config.tunnel.bind_address = with_port(&config.tunnel.bind_address, port);
    }
    if args.verify_client_cert {
        config.https.verify_client_cert = true;
    }
    if args.no_tls_dial {
        config.tunnel.tls_dial_heuristic = false;
    }
    if args.proxy_tls {
        config.tunnel.tls = true;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    apply_overrides(&mut config, &args);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {}", error);
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tunnel-proxy starting");

    let certs = CertStore::install_global(CertStore::from_config(&config.certs)?)
        .map_err(|_| "certificate store already initialized")?;

    let shutdown = Shutdown::new();
    let running = start(&config, certs, &shutdown).await?;

    let signal = wait_for_signal().await?;
    tracing::info!(signal, "Signal received, shutting down");
    shutdown.trigger();

    running.wait().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
