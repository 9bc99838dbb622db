mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use dbfleet::backup::{BackupOptions, RestoreOptions};
use dbfleet::engine::ScriptSource;
use dbfleet::{Context, CreateRequest, Error as DbError, Orchestrator};
use output::{CliOutput, UserOutput};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let out = CliOutput;
            if let Some(db_error) = e.downcast_ref::<DbError>() {
                out.error(&format!("Error: {}", db_error));
                if let Some(suggestion) = db_error.suggestion() {
                    out.warning(&format!("Hint: {}", suggestion));
                }
            } else {
                out.error(&format!("Error: {:#}", e));
            }
            std::process::exit(1);
        }
    }
}

/// Dispatch the parsed command. Returns the process exit code.
async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = match cli.home {
        Some(home) => Context::new(home)?,
        None => Context::from_env()?,
    };
    let orchestrator = Orchestrator::builder().context(ctx).build()?;
    let out: Arc<dyn UserOutput> = Arc::new(CliOutput);

    match cli.command {
        Commands::Create {
            name,
            engine,
            version,
            port,
            database,
            start,
        } => {
            let request = CreateRequest {
                engine: engine.into(),
                version,
                port,
                database,
            };
            commands::run_create(&orchestrator, &name, request, start, out).await?;
        }
        Commands::Start { name, engine } => {
            commands::run_start(&orchestrator, &name, engine.map(Into::into), out).await?;
        }
        Commands::Stop { name, engine } => {
            commands::run_stop(&orchestrator, &name, engine.map(Into::into), out.as_ref()).await?;
        }
        Commands::Status { name, engine, json } => {
            commands::run_status(&orchestrator, &name, engine.map(Into::into), json, out.as_ref())
                .await?;
        }
        Commands::List { engine, json } => {
            commands::run_list(&orchestrator, engine.map(Into::into), json, out.as_ref()).await?;
        }
        Commands::Delete { name, engine } => {
            commands::run_delete(&orchestrator, &name, engine.map(Into::into), out.as_ref())
                .await?;
        }
        Commands::Rename { old, new, engine } => {
            commands::run_rename(&orchestrator, &old, &new, engine.map(Into::into), out.as_ref())
                .await?;
        }
        Commands::Clone {
            source,
            target,
            engine,
        } => {
            commands::run_clone(
                &orchestrator,
                &source,
                &target,
                engine.map(Into::into),
                out.as_ref(),
            )
            .await?;
        }
        Commands::Relocate { name, destination } => {
            commands::run_relocate(&orchestrator, &name, &destination, out.as_ref())?;
        }
        Commands::Backup {
            name,
            output,
            engine,
            database,
            format,
        } => {
            let options = BackupOptions {
                database,
                format: format.into(),
            };
            commands::run_backup(
                &orchestrator,
                &name,
                engine.map(Into::into),
                &output,
                options,
                out.as_ref(),
            )
            .await?;
        }
        Commands::Restore {
            name,
            backup,
            engine,
            database,
            create_database,
            drop,
            validate_version,
        } => {
            let options = RestoreOptions {
                database,
                create_database,
                drop,
                validate_version,
            };
            commands::run_restore(
                &orchestrator,
                &name,
                engine.map(Into::into),
                &backup,
                options,
                out.as_ref(),
            )
            .await?;
        }
        Commands::Detect { path, json } => {
            commands::run_detect(&orchestrator, &path, json, out.as_ref())?;
        }
        Commands::Url {
            name,
            engine,
            database,
        } => {
            commands::run_url(
                &orchestrator,
                &name,
                engine.map(Into::into),
                database.as_deref(),
                out.as_ref(),
            )?;
        }
        Commands::Run {
            name,
            file,
            sql,
            engine,
            database,
        } => {
            let script = match (file, sql) {
                (Some(path), _) => ScriptSource::File(path),
                (None, Some(sql)) => ScriptSource::Inline(sql),
                (None, None) => anyhow::bail!("Pass a SQL file with --file or inline SQL with -c"),
            };
            return commands::run_script(
                &orchestrator,
                &name,
                engine.map(Into::into),
                script,
                database.as_deref(),
                out.as_ref(),
            )
            .await;
        }
        Commands::Db(db) => {
            commands::run_db(&orchestrator, db, out.as_ref()).await?;
        }
        Commands::Install { engine, version } => {
            commands::run_install(&orchestrator, engine.into(), version, out).await?;
        }
        Commands::Uninstall { engine, version } => {
            commands::run_uninstall(&orchestrator, engine.into(), &version, out.as_ref())?;
        }
        Commands::Installed { engine, json } => {
            commands::run_installed(&orchestrator, engine.map(Into::into), json, out.as_ref())?;
        }
        Commands::Dump {
            uri,
            output,
            engine,
            format,
        } => {
            commands::run_dump(
                &orchestrator,
                engine.into(),
                &uri,
                &output,
                format.into(),
                out.as_ref(),
            )
            .await?;
        }
        Commands::Orphans { prune } => {
            commands::run_orphans(&orchestrator, prune, out.as_ref())?;
        }
    }

    Ok(0)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new(default)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
