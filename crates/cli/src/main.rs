// Path: crates/cli/src/main.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! # auditchain CLI
//!
//! Operator tool for the certification controller: checks network compliance,
//! switches to an approved network, certifies reports on the ledger and keeps
//! the report backend in step.

use anyhow::{anyhow, Context, Result};
use auditchain_api::cancel::cancel_pair;
use auditchain_client::{HttpBackendStore, JsonRpcChainProvider};
use auditchain_controller::CertificationController;
use auditchain_telemetry::init::{init_tracing, LogFormat};
use auditchain_types::config::ControllerConfig;
use auditchain_types::error::ControllerError;
use auditchain_types::ledger::{Confirmation, TxHandle};
use auditchain_types::report::{ContentFingerprint, ReportId};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

const DEFAULT_CONFIG: &str = "auditchain.toml";

#[derive(Parser, Debug)]
#[clap(
    name = "auditchain",
    version,
    about = "Certify audit reports on an approved ledger network.",
    long_about = "Keeps ledger operations off the forbidden network, negotiates a switch to an approved one, submits report certifications and propagates confirmations to the report backend."
)]
struct Cli {
    /// Configuration file. Defaults to ./auditchain.toml when present.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[clap(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormatArg,

    /// Print the Prometheus metrics after the command finishes.
    #[clap(long, global = true)]
    metrics: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // --- Network ---
    /// Show the active network and its compliance.
    Status,

    /// Connect to the signer, switching away from the forbidden network.
    Connect,

    /// Switch to the first approved network the host accepts.
    Switch,

    /// Check that the certification contract is deployed on the active network.
    VerifyDeployment,

    /// Follow network changes and controller state until interrupted.
    Watch,

    // --- Certification ---
    /// Certify a report on the ledger and mark it certified in the backend.
    Certify(CertifyArgs),

    /// Wait again for a transaction submitted by an earlier, interrupted run.
    Resume(ResumeArgs),

    // --- Reports ---
    /// Inspect and manage reports in the backend.
    Reports {
        #[clap(subcommand)]
        command: ReportCommands,
    },

    /// Print the content fingerprint (SHA-256) of a file.
    Fingerprint {
        /// File to digest.
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct CertifyArgs {
    /// Backend id of the report.
    report_id: String,

    /// How often to retry the backend update when the ledger confirmed but
    /// the backend did not accept the flag.
    #[clap(long, default_value = "3")]
    reconcile_retries: u32,
}

#[derive(Parser, Debug)]
struct ResumeArgs {
    /// Backend id of the report.
    report_id: String,
    /// Transaction hash printed by the interrupted run.
    tx: String,
}

#[derive(Subcommand, Debug)]
enum ReportCommands {
    /// List report summaries, newest first.
    List,
    /// Show one report.
    Show { id: String },
    /// Delete a report.
    Delete { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

// -----------------------------------------------------------------------------
// Wiring
// -----------------------------------------------------------------------------

struct Runtime {
    config: ControllerConfig,
    provider: Arc<JsonRpcChainProvider>,
    controller: Arc<CertificationController>,
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => ControllerConfig::load(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG)),
        None => {
            tracing::info!("no configuration file, using defaults");
            Ok(ControllerConfig::default())
        }
    }
}

fn build_runtime(config: ControllerConfig) -> Result<Runtime> {
    let provider = Arc::new(
        JsonRpcChainProvider::new(&config.provider).context("Failed to create chain provider")?,
    );
    let store = Arc::new(
        HttpBackendStore::new(&config.backend).context("Failed to create backend client")?,
    );
    let controller = Arc::new(CertificationController::new(
        &config,
        provider.clone(),
        store,
        auditchain_telemetry::prometheus::install(),
    ));
    Ok(Runtime {
        config,
        provider,
        controller,
    })
}

// -----------------------------------------------------------------------------
// Logic Implementation
// -----------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format.into()).map_err(|e| anyhow!(e))?;

    if let Commands::Fingerprint { path } = &cli.command {
        return run_fingerprint(path);
    }

    let config = load_config(cli.config.as_deref())?;
    let rt = build_runtime(config)?;

    let result = match cli.command {
        Commands::Status => run_status(&rt).await,
        Commands::Connect => run_connect(&rt).await,
        Commands::Switch => run_switch(&rt).await,
        Commands::VerifyDeployment => run_verify(&rt).await,
        Commands::Watch => run_watch(&rt).await,
        Commands::Certify(args) => run_certify(&rt, args).await,
        Commands::Resume(args) => run_resume(&rt, args).await,
        Commands::Reports { command } => run_reports(&rt, command).await,
        Commands::Fingerprint { .. } => Ok(()),
    };

    if cli.metrics {
        print!("{}", auditchain_telemetry::prometheus::render());
    }
    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn network_label(rt: &Runtime, network: Option<auditchain_types::network::NetworkId>) -> String {
    match network {
        Some(id) => rt.config.policy.display_name(id),
        None => "<none>".to_string(),
    }
}

/// Neutral outcomes are reported and end the command successfully.
fn settle(err: ControllerError) -> Result<()> {
    if err.is_neutral() {
        println!("Cancelled: {}", err);
        return Ok(());
    }
    if err.is_retry_safe() {
        println!("It is safe to run the command again.");
    }
    Err(anyhow!(err))
}

// --- Network handlers ---

async fn run_status(rt: &Runtime) -> Result<()> {
    let compliance = rt.controller.refresh().await?;
    let snapshot = rt.controller.snapshot();
    println!("Network Status:");
    println!("  Network:    {}", network_label(rt, snapshot.active_network));
    println!("  Compliance: {}", compliance);
    if let Some(network) = snapshot.active_network {
        let contract = rt
            .config
            .policy
            .contract_for(network)
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "<none>".to_string());
        println!("  Contract:   {}", contract);
    }
    Ok(())
}

async fn run_connect(rt: &Runtime) -> Result<()> {
    match rt.controller.connect().await {
        Ok(snapshot) => {
            println!("✅ Connected");
            println!("  Network:    {}", network_label(rt, snapshot.active_network));
            println!("  Compliance: {}", snapshot.compliance);
            println!(
                "  Account:    {}",
                rt.controller.account().unwrap_or_else(|| "<none>".into())
            );
            println!(
                "  Contract:   {}",
                rt.controller
                    .contract()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "<none>".into())
            );
            Ok(())
        }
        Err(e) => settle(e),
    }
}

async fn run_switch(rt: &Runtime) -> Result<()> {
    match rt.controller.switch_to_compliant().await {
        Ok(network) => {
            println!("✅ Switched to {}", rt.config.policy.display_name(network));
            Ok(())
        }
        Err(ControllerError::Negotiation(failure)) => {
            println!("Could not switch to an approved network:");
            for candidate in &failure.attempted {
                println!(
                    "  {}: {}",
                    rt.config.policy.display_name(candidate.network),
                    candidate.reason
                );
            }
            Err(anyhow!(failure))
        }
        Err(e) => settle(e),
    }
}

async fn run_verify(rt: &Runtime) -> Result<()> {
    let deployment = rt.controller.verify_deployment().await?;
    println!("Contract Deployment:");
    println!("  Network:      {}", rt.config.policy.display_name(deployment.network));
    println!("  Address:      {}", deployment.contract);
    println!("  Report count: {}", deployment.report_count);
    Ok(())
}

async fn run_watch(rt: &Runtime) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = rt.provider.spawn_network_poller(
        Duration::from_millis(rt.config.provider.poll_interval_ms),
        shutdown_rx.clone(),
    );
    let watcher = rt.controller.spawn_network_watcher(shutdown_rx);
    let mut snapshots = rt.controller.subscribe();

    if let Err(e) = rt.controller.refresh().await {
        tracing::warn!(error = %e, "initial network read failed");
    }
    print_json(&*snapshots.borrow_and_update())?;
    println!("Watching for network changes. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_json(&snapshot)?;
            }
        }
    }

    println!("\n🛑 Stopping...");
    let _ = shutdown_tx.send(true);
    poller.await?;
    watcher.await?;
    Ok(())
}

// --- Certification handlers ---

async fn run_certify(rt: &Runtime, args: CertifyArgs) -> Result<()> {
    let id = ReportId::from(args.report_id);
    let report = rt.controller.load_report(&id).await?;
    if report.is_certified {
        println!("Report {} is already marked certified in the backend.", id);
    }
    println!("Certifying report {} ({})...", report.id, report.filename);

    let (handle, cancel) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    let result = rt.controller.certify_with_cancel(&report, cancel).await;
    interrupt.abort();

    match result {
        Ok(confirmation) => {
            print_confirmation(&confirmation);
            Ok(())
        }
        Err(ControllerError::Reconcile(err)) => match err.confirmation.clone() {
            Some(confirmation) => {
                print_confirmation(&confirmation);
                println!("⚠️  Ledger confirmed, backend update failed: {}", err.cause);
                retry_backend(rt, &confirmation, args.reconcile_retries).await
            }
            None => Err(anyhow!(err)),
        },
        Err(ControllerError::Certify(err)) if err.tx().is_some() && !err.is_retry_safe() => {
            let tx = err.tx().map(|t| t.to_string()).unwrap_or_default();
            println!("Transaction {} may still be included. Do not certify again; run:", tx);
            println!("  auditchain resume {} {}", report.id, tx);
            Err(anyhow!(err))
        }
        Err(e) => settle(e),
    }
}

async fn retry_backend(rt: &Runtime, confirmation: &Confirmation, retries: u32) -> Result<()> {
    let mut backoff = Duration::from_millis(500);
    for attempt in 1..=retries {
        tokio::time::sleep(backoff).await;
        match rt.controller.retry_reconcile(confirmation).await {
            Ok(()) => {
                println!("✅ Backend updated (retry {} of {})", attempt, retries);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "backend update retry failed");
                backoff = backoff.saturating_mul(2);
            }
        }
    }
    Err(anyhow!(
        "backend does not reflect ledger confirmation {} for report {}",
        confirmation.tx,
        confirmation.report_id
    ))
}

async fn run_resume(rt: &Runtime, args: ResumeArgs) -> Result<()> {
    let id = ReportId::from(args.report_id);
    let report = rt.controller.load_report(&id).await?;
    match rt
        .controller
        .resume_confirmation(&report, TxHandle(args.tx))
        .await
    {
        Ok(confirmation) => {
            print_confirmation(&confirmation);
            Ok(())
        }
        Err(ControllerError::Reconcile(err)) => match err.confirmation.clone() {
            Some(confirmation) => retry_backend(rt, &confirmation, 3).await,
            None => Err(anyhow!(err)),
        },
        Err(e) => settle(e),
    }
}

fn print_confirmation(confirmation: &Confirmation) {
    println!("✅ Certified on the ledger");
    println!("  Report: {}", confirmation.report_id);
    println!("  Tx:     {}", confirmation.tx);
    println!("  Block:  {}", confirmation.block_number);
    println!("  Chain:  {}", confirmation.network);
}

// --- Report handlers ---

async fn run_reports(rt: &Runtime, command: ReportCommands) -> Result<()> {
    match command {
        ReportCommands::List => {
            let reports = rt.controller.list_reports().await?;
            if reports.is_empty() {
                println!("No reports.");
            }
            for report in reports {
                println!(
                    "{:<12} {:<20} {:>6.1} {:<10} {}",
                    report.id,
                    report.timestamp,
                    report.quality_score,
                    if report.is_certified { "certified" } else { "-" },
                    report.filename
                );
            }
        }
        ReportCommands::Show { id } => {
            let report = rt.controller.load_report(&ReportId::from(id)).await?;
            print_json(&report)?;
        }
        ReportCommands::Delete { id } => {
            let id = ReportId::from(id);
            rt.controller.delete_report(&id).await?;
            println!("Deleted report {}", id);
        }
    }
    Ok(())
}

fn run_fingerprint(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    println!("{}", ContentFingerprint::of(&bytes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_certify_with_global_flags() {
        let cli = Cli::try_parse_from([
            "auditchain",
            "certify",
            "r-1",
            "--config",
            "custom.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.log_format, LogFormatArg::Json);
        match cli.command {
            Commands::Certify(args) => {
                assert_eq!(args.report_id, "r-1");
                assert_eq!(args.reconcile_retries, 3);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_report_subcommands() {
        let cli = Cli::try_parse_from(["auditchain", "reports", "delete", "r-9"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Reports {
                command: ReportCommands::Delete { id }
            } if id == "r-9"
        ));
    }

    #[test]
    fn fingerprint_matches_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"abc").unwrap();
        assert!(run_fingerprint(&path).is_ok());
        assert_eq!(
            ContentFingerprint::of(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(run_fingerprint(&dir.path().join("missing.pdf")).is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/auditchain.toml"))).is_err());
    }
}
