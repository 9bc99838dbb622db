use crate::output::{with_progress, UserOutput};
use dbfleet::{CreateRequest, EngineKind, Orchestrator};
use std::path::Path;
use std::sync::Arc;

pub async fn run_create(
    orchestrator: &Orchestrator,
    name: &str,
    request: CreateRequest,
    start: bool,
    out: Arc<dyn UserOutput>,
) -> anyhow::Result<()> {
    let preferred = request.port;
    let created = with_progress(out.clone(), |progress| async move {
        orchestrator.create(name, request, &progress).await
    })
    .await?;

    let config = &created.config;
    if !created.port_is_default {
        out.warning(&format!(
            "Port {} is taken, using {}",
            preferred.unwrap_or_else(|| config.engine.default_port()),
            config.port
        ));
    }
    out.success(&format!(
        "Created {} container '{}' ({})",
        config.engine, config.name, config.version
    ));

    if start {
        run_start(orchestrator, name, Some(config.engine), out).await?;
    }
    Ok(())
}

pub async fn run_start(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    out: Arc<dyn UserOutput>,
) -> anyhow::Result<()> {
    let started = with_progress(out.clone(), |progress| async move {
        orchestrator.start(name, engine, &progress).await
    })
    .await?;

    if started.retries_used > 0 {
        out.warning(&format!(
            "Started on port {} after {} retr{}",
            started.outcome.port,
            started.retries_used,
            if started.retries_used == 1 { "y" } else { "ies" }
        ));
    }
    out.success(&format!("Container '{}' is running", started.config.name));
    out.status(&format!("  {}", started.outcome.connection_string));
    Ok(())
}

pub async fn run_stop(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.progress(&format!("Stopping {}...", name));
    match orchestrator.stop(name, engine).await {
        Ok(_) => {
            out.finish_progress(" done");
            Ok(())
        }
        Err(e) => {
            out.finish_progress(" failed");
            Err(e.into())
        }
    }
}

pub async fn run_delete(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let deleted = orchestrator.delete(name, engine).await?;
    out.success(&format!("Deleted {} container '{}'", deleted.engine, deleted.name));
    Ok(())
}

pub async fn run_rename(
    orchestrator: &Orchestrator,
    old: &str,
    new: &str,
    engine: Option<EngineKind>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    orchestrator.rename(old, new, engine).await?;
    out.success(&format!("Renamed '{}' to '{}'", old, new));
    Ok(())
}

pub async fn run_clone(
    orchestrator: &Orchestrator,
    source: &str,
    target: &str,
    engine: Option<EngineKind>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let cloned = orchestrator.clone_container(source, target, engine).await?;
    out.success(&format!("Cloned '{}' to '{}'", source, target));
    if cloned.port != 0 {
        out.status(&format!("  port {}", cloned.port));
    }
    Ok(())
}

pub fn run_relocate(
    orchestrator: &Orchestrator,
    name: &str,
    destination: &Path,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let config = orchestrator.relocate(name, destination)?;
    out.success(&format!("Moved '{}' to {}", name, config.database));
    Ok(())
}

pub fn run_orphans(orchestrator: &Orchestrator, prune: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let orphans = if prune {
        orchestrator.prune_orphans()?
    } else {
        orchestrator.orphans()?
    };
    if orphans.is_empty() {
        out.status("No orphaned registrations");
        return Ok(());
    }
    for entry in &orphans {
        out.status(&format!("  {:<24} {}", entry.name, entry.file_path.display()));
    }
    if prune {
        out.success(&format!("Removed {} orphaned registration(s)", orphans.len()));
    } else {
        out.status("Run `dbf orphans --prune` to remove them");
    }
    Ok(())
}
