//! modelgate: security gateway for LLM traffic
//!
//! Entry point and composition root. Every long-lived component — the
//! certificate authority, the secrets session store, the PII analyzer, the
//! rule registry — is constructed exactly once here and handed to consumers
//! by reference; nothing reaches for ambient globals.
//!
//! # I/O Architecture
//!
//! - **Audit logging** goes to syslog (never stdout/stderr)
//! - **Debug logging** goes to stderr via `tracing`, gated by `-v` flags
//! - The gateway itself only ever speaks HTTP on its listen socket

use anyhow::{Context, Result};
use clap::Parser;
use modelgate::ca::CertificateAuthority;
use modelgate::cli::{Cli, Commands};
use modelgate::collab::{NullAuditStore, ProviderEndpoint, ProviderRegistry, StaticProviderRegistry};
use modelgate::config::{Config, ConfigLoader};
use modelgate::mux::{MuxRouter, RuleRegistry};
use modelgate::pipeline::select::PipelineSelector;
use modelgate::pipeline::steps::{
    CommandInterceptionStep, ContextInjectionStep, NotificationStep, PiiAnalyzer,
    PiiRedactionStep, RestorationStep, SecretsRedactionStep,
};
use modelgate::pipeline::{InputPipeline, InputStep, OutputPipeline, OutputStep};
use modelgate::proxy::{CertifiedKeyCache, GatewayServer, GatewayState, RouteTable};
use modelgate::secrets::{SecretsRedactor, SessionStore, SignatureSet};
use modelgate::telemetry::{AuditEvent, AuditLogger};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;
    let cert_dir = ConfigLoader::default_cert_dir(&config);

    match cli.command {
        Some(Commands::GenerateCerts) => generate_certs(&config, &cert_dir),
        Some(Commands::Serve) | None => serve(config, cert_dir).await,
    }
}

/// Bootstrap certificates and exit.
fn generate_certs(config: &Config, cert_dir: &Path) -> Result<()> {
    CertificateAuthority::check_and_ensure_certificates(cert_dir, &config.gateway.server_domain)
        .context("Certificate bootstrap failed")?;

    println!(
        "CA certificate ready: {}\nInstall it into your tool's trust store to enable interception.",
        cert_dir.join("ca.crt").display()
    );
    Ok(())
}

/// Assemble the gateway and run it until shutdown.
async fn serve(config: Config, cert_dir: PathBuf) -> Result<()> {
    let audit = match AuditLogger::new() {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            warn!("Audit logging disabled (no syslog): {e}");
            Arc::new(AuditLogger::new_null())
        }
    };

    let ca = Arc::new(
        CertificateAuthority::check_and_ensure_certificates(
            &cert_dir,
            &config.gateway.server_domain,
        )
        .context("Certificate bootstrap failed")?,
    );
    let key_cache = Arc::new(CertifiedKeyCache::new(ca.clone()));

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(
        config.gateway.session_ttl_secs,
    )));

    let signatures = match &config.gateway.signatures_path {
        Some(path) => SignatureSet::load(path).context("Failed to load signature rules")?,
        None => SignatureSet::builtin(),
    };
    let redactor = Arc::new(SecretsRedactor::new(Arc::new(signatures), sessions.clone()));
    let analyzer = Arc::new(PiiAnalyzer::new());

    let registry = Arc::new(RuleRegistry::new());
    for (name, rules) in config
        .compiled_workspaces()
        .context("Failed to compile workspace rules")?
    {
        registry.replace_rules(&name, rules);
    }
    if let Some(active) = config.workspaces.iter().find(|w| w.active) {
        registry
            .set_active(&active.name)
            .context("Failed to activate workspace")?;
    }

    // Input steps in spec order: redactions first, then injection, with
    // command interception able to answer locally.
    let secrets_step = Arc::new(SecretsRedactionStep::new(redactor.clone()));
    let pii_step = Arc::new(PiiRedactionStep::new(analyzer, sessions.clone()));

    let mut chat_input: Vec<Arc<dyn InputStep>> = vec![secrets_step.clone(), pii_step.clone()];
    if !config.pipeline.custom_instructions.is_empty() {
        chat_input.push(Arc::new(ContextInjectionStep::new(
            config.pipeline.custom_instructions.clone(),
        )));
    }
    if config.pipeline.intercept_commands {
        chat_input.push(Arc::new(CommandInterceptionStep::new(registry.clone())));
    }
    let fim_input: Vec<Arc<dyn InputStep>> = vec![secrets_step, pii_step];

    let restore = Arc::new(RestorationStep::new(redactor));
    let mut chat_output: Vec<Arc<dyn OutputStep>> = vec![restore.clone()];
    if config.pipeline.notify_redactions {
        chat_output.push(Arc::new(NotificationStep));
    }
    let fim_output: Vec<Arc<dyn OutputStep>> = vec![restore];

    let selector = Arc::new(PipelineSelector::new(
        Arc::new(InputPipeline::new(chat_input)),
        Arc::new(InputPipeline::new(fim_input)),
        Arc::new(OutputPipeline::new(chat_output)),
        Arc::new(OutputPipeline::new(fim_output)),
    ));

    let providers: Arc<dyn ProviderRegistry> = Arc::new(StaticProviderRegistry::new(
        config
            .providers
            .iter()
            .map(|p| {
                (
                    ProviderEndpoint {
                        name: p.name.clone(),
                        kind: p.kind,
                        base_url: p.base_url.clone(),
                        api_key_env: p.api_key_env.clone(),
                    },
                    p.models.clone(),
                )
            })
            .collect(),
    ));
    let router = Arc::new(MuxRouter::new(registry, providers.clone()));

    let state = Arc::new(GatewayState {
        key_cache,
        sessions,
        selector,
        router,
        providers,
        routes: Arc::new(RouteTable::new(config.route_entries())),
        audit_store: Arc::new(NullAuditStore),
        audit: audit.clone(),
        max_body_bytes: config.gateway.max_body_bytes,
    });

    let listen: SocketAddr = config
        .gateway
        .listen
        .parse()
        .context("Invalid listen address")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    audit.log(AuditEvent::GatewayStart {
        listen: listen.to_string(),
        pid: std::process::id(),
    });
    let started = Instant::now();

    GatewayServer::new(listen, state, shutdown_rx)
        .run()
        .await
        .context("Gateway server failed")?;

    audit.log(AuditEvent::GatewayStop {
        uptime_sec: started.elapsed().as_secs(),
    });
    Ok(())
}

/// Initialize stderr debug logging from the `-v` count (RUST_LOG wins).
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("modelgate={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
