use crate::cli::DbCommands;
use crate::output::UserOutput;
use dbfleet::Orchestrator;

pub async fn run_db(
    orchestrator: &Orchestrator,
    command: DbCommands,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Create {
            container,
            database,
            engine,
        } => {
            orchestrator
                .create_database(&container, engine.map(Into::into), &database)
                .await?;
            out.success(&format!("Created database '{}' in '{}'", database, container));
        }
        DbCommands::Drop {
            container,
            database,
            engine,
        } => {
            orchestrator
                .drop_database(&container, engine.map(Into::into), &database)
                .await?;
            out.success(&format!("Dropped database '{}' from '{}'", database, container));
        }
        DbCommands::List { container, engine } => {
            for database in orchestrator
                .list_databases(&container, engine.map(Into::into))
                .await?
            {
                out.status(&format!("  {}", database));
            }
        }
    }
    Ok(())
}
