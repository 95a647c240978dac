use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::sandbox::GuestLanguage;

#[derive(Parser, Debug)]
#[clap(name = "playlet")]
#[clap(version, about = "Sandboxed code playground with a synchronized popout output")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "PLAYLET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a snippet once and print its output
    Run(RunArgs),

    /// Re-run a file whenever it changes, mirrored in the popout
    Watch(WatchArgs),

    /// Hand code over to the playground
    Handoff(HandoffArgs),

    /// List known languages and how they run
    Languages,

    /// Initialize a new playlet configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Execution Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Source file (reads stdin when no file, --code or --handoff is given)
    #[clap(conflicts_with_all = ["code", "handoff"])]
    pub file: Option<PathBuf>,

    /// Language id or alias (js, ts, html, py, ...); detected from the file extension by default
    #[clap(long, short = 'l', value_parser = parse_language)]
    pub language: Option<GuestLanguage>,

    /// Inline source text
    #[clap(long, short = 'e', conflicts_with = "handoff")]
    pub code: Option<String>,

    /// Run the code waiting in the playground handoff slot
    #[clap(long)]
    pub handoff: bool,

    /// Override the execution timeout in seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Also write the output to the popout surface
    #[clap(long)]
    pub pop: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Source file to watch
    pub file: PathBuf,

    /// Language id or alias; detected from the file extension by default
    #[clap(long, short = 'l', value_parser = parse_language)]
    pub language: Option<GuestLanguage>,
}

// ============================================================================
// Handoff Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct HandoffArgs {
    #[clap(subcommand)]
    pub action: HandoffAction,
}

#[derive(Subcommand, Debug)]
pub enum HandoffAction {
    /// Store a code block for the playground (reads stdin without a file)
    Put(HandoffPutArgs),
    /// Print and consume the waiting code block
    Take,
}

#[derive(Args, Debug)]
pub struct HandoffPutArgs {
    /// File holding the code block
    pub file: Option<PathBuf>,

    /// Language of the block
    #[clap(long, short = 'l', value_parser = parse_language)]
    pub language: Option<GuestLanguage>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

fn parse_language(s: &str) -> Result<GuestLanguage, String> {
    if s.trim().is_empty() {
        return Err("language must not be empty".to_string());
    }
    Ok(GuestLanguage::parse(s))
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
