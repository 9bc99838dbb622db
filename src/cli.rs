use clap::{Parser, Subcommand, ValueEnum};
use dbfleet::backup::OutputFormat;
use dbfleet::EngineKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbf")]
#[command(about = "dbfleet - Local database containers for development", version)]
pub struct Cli {
    /// State directory (defaults to $DBFLEET_HOME or ~/.dbfleet)
    #[arg(long, global = true, env = "DBFLEET_HOME")]
    pub home: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Engine selector accepted on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    #[value(alias = "postgres", alias = "pg")]
    Postgresql,
    #[value(alias = "sqlite3")]
    Sqlite,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Postgresql => EngineKind::Postgresql,
            EngineArg::Sqlite => EngineKind::Sqlite,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Plain SQL text
    #[default]
    Sql,
    /// Engine-native format (custom dump, database file)
    Native,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Sql => OutputFormat::Sql,
            FormatArg::Native => OutputFormat::Native,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a container
    Create {
        /// Container name
        name: String,
        /// Database engine
        #[arg(short, long, value_enum)]
        engine: EngineArg,
        /// Engine version (major, major.minor or full)
        #[arg(long)]
        version: Option<String>,
        /// Preferred port; the next free one is used if taken
        #[arg(short, long)]
        port: Option<u16>,
        /// Primary database name, or database file path for sqlite
        #[arg(short, long)]
        database: Option<String>,
        /// Start the container right after creating it
        #[arg(long)]
        start: bool,
    },
    /// Start a container
    Start {
        name: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Stop a container
    Stop {
        name: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Show a container's status
    Status {
        name: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List containers
    #[command(alias = "ls")]
    List {
        /// Only containers of this engine
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a container and its data
    #[command(alias = "rm")]
    Delete {
        name: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Rename a stopped container
    Rename {
        old: String,
        new: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Copy a stopped container under a new name
    Clone {
        source: String,
        target: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Move a sqlite container's database file
    Relocate {
        name: String,
        /// New file path or directory
        destination: PathBuf,
    },
    /// Back up a container
    Backup {
        name: String,
        /// Output file (or directory for directory dumps)
        output: PathBuf,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        /// Database to back up (defaults to the primary)
        #[arg(short, long)]
        database: Option<String>,
        #[arg(long, value_enum, default_value_t)]
        format: FormatArg,
    },
    /// Restore a backup into a container
    Restore {
        name: String,
        /// Backup file or directory
        backup: PathBuf,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        /// Target database (defaults to the primary)
        #[arg(short, long)]
        database: Option<String>,
        /// Create the target database first
        #[arg(long)]
        create_database: bool,
        /// Drop existing objects before restoring
        #[arg(long)]
        drop: bool,
        /// Refuse dumps from a newer server version
        #[arg(long)]
        validate_version: bool,
    },
    /// Identify a backup's format without restoring it
    Detect {
        path: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a container's connection string
    Url {
        name: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        #[arg(short, long)]
        database: Option<String>,
    },
    /// Run SQL against a container
    Run {
        name: String,
        /// SQL file to execute
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,
        /// Inline SQL
        #[arg(short = 'c', long = "command")]
        sql: Option<String>,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
        #[arg(short, long)]
        database: Option<String>,
    },
    /// Manage databases inside a container
    #[command(subcommand)]
    Db(DbCommands),
    /// Install engine binaries
    Install {
        #[arg(value_enum)]
        engine: EngineArg,
        version: Option<String>,
    },
    /// Remove installed engine binaries
    Uninstall {
        #[arg(value_enum)]
        engine: EngineArg,
        version: String,
    },
    /// List installed engine binaries
    Installed {
        #[arg(value_enum)]
        engine: Option<EngineArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dump a remote database by connection string
    Dump {
        /// postgresql://..., sqlite://..., file path or http(s) URL
        uri: String,
        output: PathBuf,
        #[arg(short, long, value_enum)]
        engine: EngineArg,
        #[arg(long, value_enum, default_value_t)]
        format: FormatArg,
    },
    /// List or remove sqlite registrations whose file is gone
    Orphans {
        /// Remove them
        #[arg(long)]
        prune: bool,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Create a database
    Create {
        container: String,
        database: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// Drop a database
    Drop {
        container: String,
        database: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
    /// List databases
    List {
        container: String,
        #[arg(short, long, value_enum)]
        engine: Option<EngineArg>,
    },
}
