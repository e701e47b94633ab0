//! opwire demo host.
//!
//! Serves the customer operations over HTTP, backed by in-memory
//! persistence, until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use opwire_core::WireFormat;
use opwire_server::network::{NetworkConfig, NetworkModule, TlsConfig};
use opwire_server::service::domain::register_customer_service;
use opwire_server::{InMemoryPersistence, RequestDispatcher, ServerConfig, ServiceRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, env = "OPWIRE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "OPWIRE_PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "OPWIRE_NODE_ID", default_value = "opwire-1")]
    node_id: String,

    /// PEM certificate chain; enables TLS together with `--tls-key`.
    #[arg(long, env = "OPWIRE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "OPWIRE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Treat `X-Forwarded-Proto: https` as a secure channel.
    #[arg(long, env = "OPWIRE_TRUST_FORWARDED_PROTO")]
    trust_forwarded_proto: bool,

    #[arg(long, env = "OPWIRE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    #[arg(long, env = "OPWIRE_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    #[arg(long, env = "OPWIRE_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent_operations: u32,

    /// Format used when a request names none.
    #[arg(long, env = "OPWIRE_DEFAULT_FORMAT", default_value = "json", value_parser = parse_format)]
    default_format: WireFormat,

    /// Record restriction rules without enforcing them.
    #[arg(long, env = "OPWIRE_DISABLE_RESTRICTIONS")]
    disable_restrictions: bool,

    /// Fail startup when an operation's direction cannot be inferred.
    #[arg(long, env = "OPWIRE_STRICT_VERBS")]
    strict_verb_inference: bool,

    /// Expose Prometheus metrics on this address.
    #[arg(long, env = "OPWIRE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "OPWIRE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            node_id: self.node_id.clone(),
            default_operation_timeout_ms: self.operation_timeout_ms,
            max_concurrent_operations: self.max_concurrent_operations,
            enable_access_restrictions: !self.disable_restrictions,
            default_format: self.default_format,
            strict_verb_inference: self.strict_verb_inference,
            ..ServerConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_millis(self.operation_timeout_ms.saturating_add(5_000)),
            trust_forwarded_proto: self.trust_forwarded_proto,
            ..NetworkConfig::default()
        }
    }
}

fn parse_format(raw: &str) -> Result<WireFormat, String> {
    WireFormat::from_path_name(raw).ok_or_else(|| format!("unknown wire format '{raw}'"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::builder()
        .parse_lossy(std::env::var("RUST_LOG").unwrap_or_else(|_| "opwire_server=info".to_owned()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let server_config = cli.server_config();
    let mut registry =
        ServiceRegistry::new().with_strict_verb_inference(server_config.strict_verb_inference);
    register_customer_service(&mut registry, Arc::new(InMemoryPersistence::new()))
        .context("failed to register customer operations")?;
    let dispatcher = RequestDispatcher::from_registry(registry, server_config.clone())
        .context("failed to compile operation routes")?;
    for (operation, template, source) in dispatcher.routes().routes() {
        info!(operation, route = %template, ?source, "route");
    }

    let mut network = NetworkModule::new(cli.network_config(), dispatcher, &server_config);
    let port = network.start().await?;
    info!(node_id = %server_config.node_id, port, "opwire server started");

    network
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
}
