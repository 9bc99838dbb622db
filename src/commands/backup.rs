use crate::output::UserOutput;
use dbfleet::backup::{BackupOptions, DumpOptions, OutputFormat, RestoreOptions};
use dbfleet::{EngineKind, Orchestrator};
use std::path::Path;

pub async fn run_backup(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    output: &Path,
    options: BackupOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let result = orchestrator.backup(name, engine, output, &options).await?;
    out.success(&format!(
        "Backed up '{}' to {} ({}, {} bytes)",
        name,
        result.path.display(),
        result.format,
        result.size
    ));
    Ok(())
}

pub async fn run_restore(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    backup: &Path,
    options: RestoreOptions,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let result = orchestrator.restore(name, engine, backup, &options).await?;
    if result.warnings {
        out.warning(&format!(
            "Restore finished with warnings (exit code {})",
            result.code
        ));
        for line in result.stderr.lines().filter(|l| !l.trim().is_empty()).take(10) {
            out.warning(&format!("  {}", line));
        }
    } else {
        out.success(&format!("Restored {} backup into '{}'", result.format, name));
    }
    Ok(())
}

pub fn run_detect(
    orchestrator: &Orchestrator,
    path: &Path,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let format = orchestrator.detect(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&format)?);
        return Ok(());
    }
    out.status(&format!("{}: {}", format.format, format.description));
    if let Some(command) = &format.restore_command {
        out.status(&format!("  restore with {}", command));
    }
    if let Some(hint) = &format.hint {
        out.warning(&format!("  {}", hint));
    }
    Ok(())
}

pub async fn run_dump(
    orchestrator: &Orchestrator,
    engine: EngineKind,
    uri: &str,
    output: &Path,
    format: OutputFormat,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let result = orchestrator
        .dump_remote(engine, uri, output, &DumpOptions { format })
        .await?;
    out.success(&format!(
        "Dumped to {} ({}, {} bytes)",
        result.path.display(),
        result.format,
        result.size
    ));
    Ok(())
}
