use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use vcf_roundup::broadcast::Broadcaster;
use vcf_roundup::router::{Inbound, Router};
use vcf_roundup::transport::{
    ArtifactLocator, ChatTransport, ContactArtifact, OutboundMessage, SendOutcome, TransportError,
};
use vcf_roundup::{
    config, init_config, init_telemetry, serve_health, ApprovalProcessor, CohortManager,
    MemoryStore, OpsPanel, SubmissionWorkflow, VcfEncoder,
};

#[derive(Parser)]
#[command(name = "vcf-roundup")]
#[command(about = "Crowdsourced contact collection and VCF distribution")]
#[command(
    long_about = "Collects name+number submissions into fixed-capacity groups, encodes each \
                  approved group into a vCard file, and distributes the download link to the \
                  group's members."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service with the console transport (JSON events on stdin)
    Serve,
    /// Print the effective configuration and exit
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            tokio::runtime::Runtime::new()?.block_on(async { serve().await })
        }
        Some(Commands::Config) => {
            let cfg = config()?;
            println!("{}", serde_json::to_string_pretty(cfg)?);
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    init_config()?;
    let cfg = config()?;
    init_telemetry(&cfg.observability.log_level)?;

    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CohortManager::new(store.clone()));
    let transport: Arc<dyn ChatTransport> = Arc::new(ConsoleTransport);
    let broadcaster = Arc::new(Broadcaster::new(transport.clone(), &cfg.broadcast));
    let approval = Arc::new(ApprovalProcessor::new(
        manager.clone(),
        transport.clone(),
        Arc::new(VcfEncoder::new(cfg.distribution.watermark.clone())),
        broadcaster.clone(),
        cfg.distribution.clone(),
    ));
    let ops = Arc::new(OpsPanel::new(
        manager.clone(),
        approval,
        broadcaster,
        cfg.operators.clone(),
    ));
    let workflow = Arc::new(SubmissionWorkflow::new(manager));
    let router = Router::new(store, workflow, ops, transport);

    let health = tokio::spawn(serve_health(cfg.health.port));

    info!("VCF Roundup serving; feed JSON events on stdin, ctrl-c to stop");
    tokio::select! {
        result = event_loop(&router) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    health.abort();
    Ok(())
}

/// Console adapter: one JSON-encoded `Inbound` per line on stdin,
/// replies printed as JSON on stdout. Lets the whole flow be exercised
/// without a chat transport attached.
async fn event_loop(router: &Router) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let inbound: Inbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed inbound event");
                continue;
            }
        };
        match router.dispatch(inbound).await {
            Ok(reply) => println!("{}", serde_json::to_string(&reply)?),
            Err(e) => error!(error = %e, "Dispatch failed"),
        }
    }
    info!("Stdin closed, stopping event loop");
    Ok(())
}

/// Transport that logs outbound traffic instead of delivering it. Every
/// send succeeds; uploads yield a synthetic locator.
struct ConsoleTransport;

#[async_trait::async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_direct(&self, recipient: i64, message: &OutboundMessage) -> SendOutcome {
        info!(recipient, text = %message.text, link = ?message.link, "Outbound direct message");
        SendOutcome::Delivered
    }

    async fn upload_artifact(
        &self,
        destination: &str,
        artifact: &ContactArtifact,
    ) -> Result<ArtifactLocator, TransportError> {
        info!(
            destination,
            file_name = %artifact.file_name,
            bytes = artifact.content.len(),
            "Outbound artifact upload"
        );
        Ok(ArtifactLocator {
            url: format!("console://{destination}/{}", artifact.file_name),
        })
    }
}
