use crate::output::UserOutput;
use dbfleet::orchestrator::ContainerState;
use dbfleet::{EngineKind, Orchestrator};

fn icon(state: &ContainerState) -> &'static str {
    if state.status.running {
        "+"
    } else {
        "o"
    }
}

pub async fn run_status(
    orchestrator: &Orchestrator,
    name: &str,
    engine: Option<EngineKind>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let state = orchestrator.status(name, engine).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let config = &state.config;
    out.status(&format!("{} {} ({} {})", icon(&state), config.name, config.engine, config.version));
    out.status(&format!("  status:   {}", config.status));
    out.status(&format!("  detail:   {}", state.status.message));
    if config.port != 0 {
        out.status(&format!("  port:     {}", config.port));
    }
    out.status(&format!("  database: {}", config.database));
    if !config.databases.is_empty() {
        out.status(&format!("  also:     {}", config.databases.join(", ")));
    }
    if let Some(source) = &config.clone_source {
        out.status(&format!("  cloned from {}", source));
    }
    Ok(())
}

pub async fn run_list(
    orchestrator: &Orchestrator,
    engine: Option<EngineKind>,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut states = orchestrator.list().await?;
    if let Some(kind) = engine {
        states.retain(|s| s.config.engine == kind);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    if states.is_empty() {
        out.status("No containers. Create one with `dbf create <name> --engine <engine>`");
        return Ok(());
    }
    out.status(&format!(
        "  {:<20} {:<11} {:<10} {:<8} {:>6}",
        "NAME", "ENGINE", "VERSION", "STATUS", "PORT"
    ));
    out.status(&format!("{:-<62}", ""));
    for state in &states {
        let c = &state.config;
        let port = if c.port == 0 {
            "-".to_string()
        } else {
            c.port.to_string()
        };
        out.status(&format!(
            "{} {:<20} {:<11} {:<10} {:<8} {:>6}",
            icon(state),
            c.name,
            c.engine.as_str(),
            c.version,
            c.status.to_string(),
            port
        ));
    }
    let running = states.iter().filter(|s| s.status.running).count();
    summary(states.len(), running, out);
    Ok(())
}

fn summary(total: usize, running: usize, out: &dyn UserOutput) {
    out.blank();
    out.status(&format!("{} container(s), {} running", total, running));
}
