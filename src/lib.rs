// src/lib.rs

pub mod cli;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod errors;
pub mod labels;
pub mod logging;
pub mod resources;
pub mod types;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, VolumeCommand};
use crate::cluster::{ClusterBackend, KubeBackend};
use crate::config::{
    RawVolumeDefinition, VolumeDefinition, load_engine_config, load_task,
};
use crate::engine::{Engine, LogEvent, SubmitPlan, TaskSnapshot, VolumeSnapshot};
use crate::labels::{Owner, OwnerScope};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - caller identity
/// - the Kubernetes-backed engine
/// - output formatting (text or JSON)
/// - Ctrl-C handling while streaming logs
pub async fn run(args: CliArgs) -> Result<()> {
    let config = load_engine_config(&args.config)
        .with_context(|| format!("loading {}", args.config))?;

    let user = args
        .user
        .as_deref()
        .ok_or_else(|| anyhow!("no user given: pass --user or set KUBELAUNCH_USER"))?;
    let owner = Owner::new(user)?;

    // Parse the task before connecting so a bad file fails fast.
    let task = match &args.command {
        Command::Submit { file, .. } => {
            Some(load_task(file).with_context(|| format!("loading task file {file}"))?)
        }
        _ => None,
    };

    let backend = KubeBackend::connect(&config.namespace).await?;
    info!(namespace = %config.namespace, owner = %owner, "connected to cluster");
    let engine = Engine::new(backend, config);

    match args.command {
        Command::Submit { dry_run, .. } => {
            let Some(task) = task else {
                return Err(anyhow!("task definition missing"));
            };
            if dry_run {
                let plan = engine.plan(&task, &owner).await?;
                print_dry_run(&plan);
            } else {
                let task_id = engine.submit(&task, &owner).await?;
                emit(args.json, &serde_json::json!({ "task_id": task_id }), || {
                    println!("{task_id}")
                })?;
            }
        }
        Command::Status { task_id } => {
            let snap = engine.status(&task_id, &OwnerScope::owner(&owner)).await?;
            emit(args.json, &snap, || print_task(&snap))?;
        }
        Command::List(scope) => {
            let tasks = engine
                .list(&OwnerScope::for_caller(&owner, scope.all_users))
                .await?;
            emit(args.json, &tasks, || tasks.iter().for_each(print_task))?;
        }
        Command::Stop { task_id, scope } => {
            let deleted = engine
                .stop(&task_id, &OwnerScope::for_caller(&owner, scope.all_users))
                .await?;
            emit(args.json, &serde_json::json!({ "deleted": deleted }), || {
                println!("stopped {task_id} ({deleted} unit(s) deleted)")
            })?;
        }
        Command::StopAll(scope) => {
            let deleted = engine
                .stop_all(&OwnerScope::for_caller(&owner, scope.all_users))
                .await?;
            emit(args.json, &serde_json::json!({ "deleted": deleted }), || {
                println!("{deleted} unit(s) deleted")
            })?;
        }
        Command::Logs { task_id } => {
            follow_logs(&engine, &task_id, &OwnerScope::owner(&owner)).await?;
        }
        Command::Volume(cmd) => run_volume(&engine, cmd, &owner, args.json).await?,
    }

    Ok(())
}

async fn run_volume<C: ClusterBackend + 'static>(
    engine: &Engine<C>,
    cmd: VolumeCommand,
    owner: &Owner,
    json: bool,
) -> Result<()> {
    match cmd {
        VolumeCommand::Create {
            name,
            size,
            storage_class,
            access_modes,
        } => {
            let mut raw = RawVolumeDefinition::new(name, size);
            raw.storage_class = storage_class;
            if !access_modes.is_empty() {
                raw.access_modes = access_modes;
            }
            let volume = VolumeDefinition::try_from(raw)?;
            let volume_id = engine.create_volume(&volume, owner).await?;
            emit(json, &serde_json::json!({ "volume_id": volume_id }), || {
                println!("{volume_id}")
            })?;
        }
        VolumeCommand::List(scope) => {
            let volumes = engine
                .list_volumes(&OwnerScope::for_caller(owner, scope.all_users))
                .await?;
            emit(json, &volumes, || volumes.iter().for_each(print_volume))?;
        }
        VolumeCommand::Status { volume_id } => {
            let volume = engine.volume_status(&volume_id, owner).await?;
            emit(json, &volume, || print_volume(&volume))?;
        }
        VolumeCommand::Delete { volume_id } => {
            engine.delete_volume(&volume_id, owner).await?;
            emit(json, &serde_json::json!({ "deleted": volume_id }), || {
                println!("deleted {volume_id}")
            })?;
        }
    }
    Ok(())
}

/// Print every log line to stdout until all nodes finish or Ctrl-C.
async fn follow_logs<C: ClusterBackend + 'static>(
    engine: &Engine<C>,
    task_id: &str,
    scope: &OwnerScope,
) -> Result<()> {
    let mut stream = engine.stream_logs(task_id, scope).await?;
    let mut failed_nodes = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(task_id, "interrupted; stopping log stream");
                stream.shutdown().await;
                return Ok(());
            }
            event = stream.next() => match event {
                Some(LogEvent::Line(line)) => println!("{line}"),
                Some(LogEvent::NodeFailed { node_idx, error }) => {
                    eprintln!("node-{node_idx}: {error}");
                    failed_nodes.push(node_idx);
                }
                None => break,
            },
        }
    }

    debug!(task_id, "log stream finished");
    if failed_nodes.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("logs unavailable for node(s) {failed_nodes:?}"))
    }
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}

fn print_task(snap: &TaskSnapshot) {
    let m = &snap.metadata;
    println!(
        "{}  {:<10} {}  nodes={} running={} succeeded={} failed={} pending={}",
        snap.task_id,
        snap.status.to_string(),
        snap.name.as_deref().unwrap_or("-"),
        m.num_nodes,
        m.running_nodes,
        m.succeeded_nodes,
        m.failed_nodes,
        m.pending_nodes,
    );
}

fn print_volume(v: &VolumeSnapshot) {
    println!(
        "{}  {:<8} {}  size={} claim={}",
        v.volume_id,
        v.status,
        v.name,
        v.size.as_deref().unwrap_or("-"),
        v.metadata.claim_name,
    );
}

/// Dry-run output: the units a submission would create.
fn print_dry_run(plan: &SubmitPlan) {
    println!("kubelaunch dry-run");
    println!("  task: {} ({})", plan.task_name, plan.task_id);
    println!();

    println!("units ({}):", plan.units.len());
    for unit in &plan.units {
        println!("  - {}", unit.name);
        println!("      image: {}", unit.image);
        println!("      command: {:?} {:?}", unit.command, unit.args);
        if !unit.resources.is_empty() {
            println!("      requests: {:?}", unit.resources.requests);
            println!("      limits: {:?}", unit.resources.limits);
        }
        let env: Vec<String> = unit
            .env
            .iter()
            .map(|e| format!("{}={}", e.name, e.value))
            .collect();
        println!("      env: {env:?}");
        for m in &unit.mounts {
            println!("      mount: {} -> {}", m.mount_path, m.claim_name);
        }
    }

    debug!("dry-run complete (nothing created)");
}
