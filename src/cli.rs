use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit status for command-line usage errors.
pub const USAGE_EXIT_CODE: i32 = 129;

/// Exit status for die-style internal errors.
pub const DIE_EXIT_CODE: i32 = 128;

#[derive(Parser)]
#[command(
    name = "spoor",
    about = "Structured execution tracing and metrics aggregation for process trees",
    version = env!("GIT_DESCRIBE"),
    after_help = "Set SPOOR_TRACE=<dir> to trace a whole spawn tree into <dir>.\nLogs are written to: ~/.local/share/spoor/logs/spoor.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to spoor.yaml config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Terminate through a normal return with the given code
    #[command(allow_negative_numbers = true)]
    Return {
        code: i32,
    },

    /// Terminate through an explicit exit call with the given code
    #[command(allow_negative_numbers = true)]
    Exit {
        code: i32,
    },

    /// Emit one error event per message
    Error {
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Run a child command and exit with its code
    Child {
        /// Child command line; the first word may be a configured alias
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Replace this process with another command
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Emit data events from <category> <key> <value> triples
    Data {
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Record recoverable defects, optionally escalating afterwards
    Bug {
        #[arg(required = true)]
        messages: Vec<String>,

        /// Terminate fatally if any defects were recorded
        #[arg(long)]
        escalate: bool,
    },

    /// Report a fatal defect and terminate
    FatalBug {
        message: String,
    },

    /// Run start/stop timer intervals, optionally across threads
    Timer {
        /// Intervals per thread
        count: u32,

        /// Delay inside each interval, in milliseconds
        delay_ms: u64,

        /// Number of worker threads (default: run on the main thread)
        #[arg(long)]
        threads: Option<usize>,

        /// Timer identifier
        #[arg(long, default_value = "test")]
        id: String,
    },

    /// Add values to a counter, optionally once per worker thread
    #[command(allow_negative_numbers = true)]
    Counter {
        #[arg(required = true)]
        values: Vec<i64>,

        /// Number of worker threads, each adding every value
        #[arg(long)]
        threads: Option<usize>,

        /// Counter identifier
        #[arg(long, default_value = "test")]
        id: String,
    },

    /// Read traced events back from the trace directory
    Show {
        /// Only the most recent N events (0 = all)
        #[arg(long, default_value_t = 20)]
        last: usize,

        /// Only events whose kind matches this regex
        #[arg(long)]
        filter: Option<String>,
    },

    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// The name recorded in the cmd_name event.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Return { .. } => "return",
            Commands::Exit { .. } => "exit",
            Commands::Error { .. } => "error",
            Commands::Child { .. } => "child",
            Commands::Exec { .. } => "exec",
            Commands::Data { .. } => "data",
            Commands::Bug { .. } => "bug",
            Commands::FatalBug { .. } => "fatal-bug",
            Commands::Timer { .. } => "timer",
            Commands::Counter { .. } => "counter",
            Commands::Show { .. } => "show",
            Commands::Completions { .. } => "completions",
        }
    }
}
