use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, Command, CommandFactory, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "fedicache")]
#[command(bin_name = "fedicache")]
#[command(version)]
#[command(about = "Local-first timeline cache for federated social clients")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "FEDICACHE_CONFIG",
        help = "TOML file overlaying the built-in configuration."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "FEDICACHE_ROOT",
        help = "Directory holding one store per identity (overrides store.root)."
    )]
    pub root: Option<PathBuf>,

    #[arg(
        short = 'i',
        long,
        global = true,
        env = "FEDICACHE_IDENTITY",
        help = "Identity whose store to open."
    )]
    pub identity: Option<String>,

    #[arg(
        id = "storage_key",
        short = 'k',
        long = "key",
        value_name = "KEY",
        global = true,
        env = "FEDICACHE_KEY",
        default_value = "",
        hide_env_values = true,
        help = "Storage key for the identity's store."
    )]
    pub key: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(subcommand, about = "Record or show the connected server.")]
    Server(ServerCommand),
    #[command(subcommand, about = "Save fetched API payloads into the store.")]
    Ingest(IngestCommand),
    #[command(subcommand, about = "Assemble sections from the store.")]
    Show(ShowCommand),
    #[command(about = "Print the cursor for the next load-older request.")]
    Cursor(CursorArgs),
    #[command(subcommand, about = "Targeted status updates.")]
    Status(StatusCommand),
    #[command(about = "Reveal or re-hide a filtered status in one context.")]
    ShowAnyway(ShowAnywayArgs),
    #[command(subcommand, about = "Evaluate capability requirements.")]
    Caps(CapsCommand),
    #[command(subcommand, about = "List or delete identity stores.")]
    Identities(IdentitiesCommand),
    #[command(about = "Generate or install shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    #[command(about = "Detect and record the server from NodeInfo software data.")]
    Set(ServerSetArgs),
    #[command(about = "Print the recorded server descriptor.")]
    Show,
}

#[derive(Debug, Args)]
pub struct ServerSetArgs {
    #[arg(long, help = "NodeInfo software.name, e.g. mastodon or pleroma.")]
    pub software: String,

    #[arg(long, help = "NodeInfo software.version.")]
    pub version: String,

    #[arg(long = "feature", help = "Detected feature flag (repeatable).")]
    pub features: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[arg(long, conflicts_with = "min_id", help = "The page was fetched older than this id.")]
    pub max_id: Option<String>,

    #[arg(long, help = "The page was fetched newer than this id.")]
    pub min_id: Option<String>,

    #[arg(long, help = "Server cursor for the page after this one.")]
    pub next_max_id: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum IngestCommand {
    #[command(about = "Merge a page of statuses (JSON array) into a timeline.")]
    Timeline {
        #[arg(help = "Timeline key: home, local, public, list:ID, tag:NAME.")]
        key: String,
        file: PathBuf,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "Save a thread: {\"status\": .., \"ancestors\": [..], \"descendants\": [..]}.")]
    Context { file: PathBuf },
    #[command(about = "Merge a page of notifications (JSON array).")]
    Notifications {
        file: PathBuf,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "Merge a page of conversations (JSON array).")]
    Conversations {
        file: PathBuf,
        #[command(flatten)]
        page: PageArgs,
    },
    #[command(about = "Replace all filters with a JSON array of v1 or v2 filters.")]
    Filters { file: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum ShowCommand {
    #[command(about = "One timeline as a section of items.")]
    Timeline { key: String },
    #[command(about = "Ancestors, parent and descendants of a status.")]
    Context { id: String },
    #[command(about = "One status with its references resolved.")]
    Status { id: String },
    #[command(about = "Stored filter rules.")]
    Filters,
}

#[derive(Debug, Args)]
pub struct CursorArgs {
    pub key: String,
}

#[derive(Debug, Subcommand)]
pub enum StatusCommand {
    #[command(about = "Set or clear a boolean flag on a cached status.")]
    Flag {
        id: String,
        #[arg(help = "favourited, reblogged, bookmarked, muted or pinned.")]
        flag: String,
        #[arg(long, help = "Clear the flag instead of setting it.")]
        off: bool,
    },
    #[command(about = "Delete a status and its reblogs from the store.")]
    Delete { id: String },
}

#[derive(Debug, Args)]
pub struct ShowAnywayArgs {
    pub status_id: String,

    #[arg(help = "Filter context: home, notifications, public, thread or account.")]
    pub context: String,

    #[arg(long, help = "Hide the status again.")]
    pub off: bool,
}

#[derive(Debug, Subcommand)]
pub enum CapsCommand {
    #[command(about = "Would this operation be attempted against the given server?")]
    Check(CapsCheckArgs),
    #[command(about = "List gated operations.")]
    Ls,
}

#[derive(Debug, Args)]
pub struct CapsCheckArgs {
    #[arg(long)]
    pub family: String,

    #[arg(long)]
    pub version: Option<String>,

    #[arg(long = "feature")]
    pub features: Vec<String>,

    #[arg(long, help = "Absorb unsupported operations instead of failing.")]
    pub lenient: bool,

    pub operation: String,
}

#[derive(Debug, Subcommand)]
pub enum IdentitiesCommand {
    Ls,
    Rm { id: String },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(help = "Shell name (bash, zsh, fish). Auto-detected if omitted.")]
    pub shell: Option<String>,

    #[arg(
        long = "install",
        help = "Write completions to the canonical path for the shell."
    )]
    pub install: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands, IngestCommand, ShowCommand};

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fedicache",
            "show",
            "timeline",
            "home",
            "--identity",
            "alice",
            "--root",
            "/tmp/x",
        ])
        .expect("args should parse");
        assert_eq!(cli.identity.as_deref(), Some("alice"));
        assert!(matches!(
            cli.command,
            Commands::Show(ShowCommand::Timeline { ref key }) if key == "home"
        ));
    }

    #[test]
    fn page_cursors_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "fedicache", "ingest", "timeline", "home", "page.json", "--max-id", "5", "--min-id",
            "3",
        ]);
        assert!(parsed.is_err());

        let cli = Cli::try_parse_from([
            "fedicache", "ingest", "timeline", "home", "page.json", "--max-id", "5",
        ])
        .expect("args should parse");
        match cli.command {
            Commands::Ingest(IngestCommand::Timeline { page, .. }) => {
                assert_eq!(page.max_id.as_deref(), Some("5"));
                assert!(page.min_id.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        super::styled_command().debug_assert();
    }
}
