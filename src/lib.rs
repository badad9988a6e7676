// src/lib.rs

pub mod cli;
pub mod config;
pub mod controller;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod phase;
pub mod seed;
pub mod store;
pub mod types;
pub mod watch;
pub mod workflow;
pub mod workflows;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::WorkflowConfig;
use crate::config::loader::load_and_validate;
use crate::controller::{ControllerOptions, SimulatedController};
use crate::seed::{SeedFile, load_seed, seed_store};
use crate::store::ConfigDb;
use crate::workflow::ProcessingBlockHandle;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the in-memory store and its seed
/// - the simulated controllers
/// - claiming the PB and running its built-in workflow
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;

    let seed = match &args.seed {
        Some(path) => load_seed(path).with_context(|| format!("loading seed from {path}"))?,
        None => SeedFile::demo(),
    };
    let pb_id = match args.pb_id.as_deref().or_else(|| seed.first_pb_id()) {
        Some(id) => id.to_string(),
        None => return Err(anyhow!("seed contains no processing blocks")),
    };

    if args.dry_run {
        print_dry_run(&cfg, &seed, &pb_id);
        return Ok(());
    }

    let sbi_duration = sbi_duration(args.sbi_duration)?;
    let db = ConfigDb::connect(cfg.store.backend)?;
    seed_store(&db, &seed)?;

    let controller = SimulatedController::spawn(
        &db,
        ControllerOptions {
            grant_resources: true,
            sbi_duration: Some(sbi_duration),
            finish_helm: true,
        },
    );

    // The workflow gets its own session so `exit` only revokes its lease.
    let session = db.new_session();
    let pb = ProcessingBlockHandle::claim_with_config(session, &pb_id, Arc::new(cfg))?;
    let outcome = workflows::run_builtin(&pb).await;
    pb.exit();

    if let Err(err) = controller.shutdown().await {
        warn!(error = %err, "simulated controller did not shut down cleanly");
    }

    print_report(&db, &pb_id)?;
    outcome?;
    Ok(())
}

/// `--sbi-duration` as a `Duration`. Negative values mean "end at once";
/// NaN and values too large for a `Duration` are rejected.
pub fn sbi_duration(secs: f64) -> Result<Duration> {
    if secs <= 0.0 {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("invalid --sbi-duration {secs}"))
}

/// Print the final state of the PB to stdout.
fn print_report(db: &ConfigDb, pb_id: &str) -> Result<()> {
    let (state, deployments) = db.txn(|txn| {
        let state = txn.get_processing_block_state(pb_id)?;
        let deployments = txn.list_deployments(&format!("proc-{pb_id}-"));
        Ok((state, deployments))
    })?;
    let state = state.ok_or_else(|| anyhow!("processing block {pb_id} has no state"))?;

    println!("processing block {pb_id}");
    match state.status {
        Some(status) => println!("  status: {status}"),
        None => println!("  status: (none)"),
    }
    if let Some(map) = &state.deployments {
        for (id, status) in map {
            println!("  deployment {id}: {status}");
        }
    }
    if !deployments.is_empty() {
        println!("  deployment records left: {deployments:?}");
    }
    if let Some(addresses) = &state.receive_addresses {
        println!("  receive addresses: {addresses}");
    }
    info!(pb_id, "run complete");
    Ok(())
}

fn print_dry_run(cfg: &WorkflowConfig, seed: &SeedFile, pb_id: &str) {
    println!("sdp-workflow dry-run");
    println!("  store.backend = {:?}", cfg.store.backend);
    println!("  deploy.helm_namespace = {}", cfg.deploy.helm_namespace);
    println!(
        "  deploy.endpoint_retries = {} (every {:?})",
        cfg.deploy.endpoint_retries,
        cfg.deploy.endpoint_retry_interval()
    );
    println!(
        "  receive = {}:{}",
        cfg.receive.service_name, cfg.receive.port
    );
    println!();

    println!("scheduling blocks ({}):", seed.scheduling_blocks.len());
    for sbi in &seed.scheduling_blocks {
        println!("  - {} [{}]", sbi.id, sbi.status);
        for scan_type in &sbi.scan_types {
            println!("      scan type {}: {} channel block(s)", scan_type.id, scan_type.channels.len());
        }
    }

    println!("processing blocks ({}):", seed.processing_blocks.len());
    for pb in &seed.processing_blocks {
        let marker = if pb.id == pb_id { " (selected)" } else { "" };
        println!(
            "  - {}{marker}: {} {} {}",
            pb.id, pb.workflow.kind, pb.workflow.id, pb.workflow.version
        );
        if let Some(sbi_id) = &pb.sbi_id {
            println!("      sbi: {sbi_id}");
        }
    }

    debug!("dry-run complete (no execution)");
}
