use crate::output::{with_progress, UserOutput};
use dbfleet::{EngineKind, Orchestrator};
use std::sync::Arc;

pub async fn run_install(
    orchestrator: &Orchestrator,
    engine: EngineKind,
    version: Option<String>,
    out: Arc<dyn UserOutput>,
) -> anyhow::Result<()> {
    let version = version.unwrap_or_else(|| engine.default_version().to_string());
    let installed = with_progress(out.clone(), |progress| {
        let version = version.clone();
        async move { orchestrator.install(engine, &version, &progress).await }
    })
    .await?;
    out.success(&format!(
        "{} {} ready at {}",
        installed.engine,
        installed.version,
        installed.path.display()
    ));
    Ok(())
}

pub fn run_uninstall(
    orchestrator: &Orchestrator,
    engine: EngineKind,
    version: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if orchestrator.uninstall(engine, version)? {
        out.success(&format!("Removed {} {}", engine, version));
    } else {
        out.warning(&format!("{} {} is not installed", engine, version));
    }
    Ok(())
}

pub fn run_installed(
    orchestrator: &Orchestrator,
    engine: Option<EngineKind>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let installed = orchestrator.installed(engine)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&installed)?);
        return Ok(());
    }
    if installed.is_empty() {
        out.status("No binaries installed");
        return Ok(());
    }
    for binary in &installed {
        out.status(&format!(
            "  {:<11} {:<10} {}",
            binary.engine,
            binary.version,
            binary.path.display()
        ));
    }
    Ok(())
}
