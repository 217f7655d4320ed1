//! Command-line surface: a derive-based command enum, one `Commands`
//! variant per subcommand, doc comments doubling as `--help` text, thin
//! option structs passed straight through to the matching phase executor.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wayforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the artifact store layout for a project directory.
    Init {
        /// Workspace directory to initialize (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// ORCHESTRATE: turn a project description into a task backlog and sprint.
    Plan {
        /// Free-text description of the project or feature to plan.
        #[arg(value_name = "DESCRIPTION")]
        description: String,

        /// Sprint identifier to assign to the generated backlog.
        #[arg(long, default_value = "sprint-1")]
        sprint: String,

        /// Workspace directory (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// COMPLETE: run a sprint's backlog to completion through the scheduler.
    Build {
        /// Sprint identifier whose backlog should be executed.
        #[arg(long, default_value = "sprint-1")]
        sprint: String,

        /// Run independent tasks in parallel batches instead of sequentially.
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Maximum tasks to run concurrently in parallel mode.
        #[arg(long, default_value = "3")]
        max_parallel_tasks: usize,

        /// Skip the interactive confirmation gate for write/delete/shell tools.
        #[arg(long, default_value = "false")]
        yes: bool,

        /// Workspace directory (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// Print the current checkpoint status for a sprint.
    Status {
        /// Sprint identifier to report on.
        #[arg(long, default_value = "sprint-1")]
        sprint: String,

        /// Workspace directory (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// Resume a sprint from its last saved checkpoint.
    Resume {
        /// Sprint identifier to resume.
        #[arg(long, default_value = "sprint-1")]
        sprint: String,

        /// Run independent tasks in parallel batches instead of sequentially.
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Skip the interactive confirmation gate for write/delete/shell tools.
        #[arg(long, default_value = "false")]
        yes: bool,

        /// Workspace directory (defaults to the current directory).
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// Print the effective configuration resolved from the environment.
    Config {
        /// Workspace directory used to resolve workspace-relative defaults.
        #[arg(long, value_name = "DIR")]
        workspace: Option<String>,
    },

    /// Send a single free-form message to the configured oracle fallback chain.
    Chat {
        /// Message to send.
        #[arg(value_name = "MESSAGE")]
        message: String,
    },
}
