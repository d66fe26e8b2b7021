// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `kubelaunch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kubelaunch",
    version,
    about = "Run multi-node batch tasks and manage volumes on Kubernetes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the engine config file (TOML).
    ///
    /// Default: `Kubelaunch.toml` in the current working directory. A
    /// missing file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Kubelaunch.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `KUBELAUNCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Identity that owns the created resources and scopes every query.
    #[arg(long, env = "KUBELAUNCH_USER", value_name = "USER", global = true)]
    pub user: Option<String>,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit a task described by a YAML file.
    Submit {
        #[arg(value_name = "FILE")]
        file: String,

        /// Validate, resolve volumes and print the units without creating them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the status of one task.
    Status {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// List tasks, newest first.
    List(ScopeArgs),

    /// Stop a task by deleting all of its units.
    Stop {
        #[arg(value_name = "TASK_ID")]
        task_id: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Stop every task.
    StopAll(ScopeArgs),

    /// Stream the logs of every node of a task until they finish.
    Logs {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// Manage persistent volumes.
    #[command(subcommand)]
    Volume(VolumeCommand),
}

#[derive(Debug, Clone, Subcommand)]
pub enum VolumeCommand {
    /// Create a volume.
    Create {
        name: String,

        /// Requested size, e.g. `10Gi`.
        size: String,

        #[arg(long, value_name = "CLASS")]
        storage_class: Option<String>,

        #[arg(long, value_name = "MODES", value_delimiter = ',')]
        access_modes: Vec<String>,
    },

    /// List volumes, newest first.
    List(ScopeArgs),

    /// Show one volume.
    Status {
        #[arg(value_name = "VOLUME_ID")]
        volume_id: String,
    },

    /// Delete a volume that no live task mounts.
    Delete {
        #[arg(value_name = "VOLUME_ID")]
        volume_id: String,
    },
}

#[derive(Debug, Clone, Copy, Args)]
pub struct ScopeArgs {
    /// Include resources of every owner.
    #[arg(long)]
    pub all_users: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
