use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "hopnotes",
    about = "Ask questions of your notes with multi-hop semantic retrieval"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the embedding model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors, and hide progress bars
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage note collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Index new and changed notes, drop deleted ones
    Sync(SyncArgs),
    /// Drop a collection's index and build it again from disk
    Rebuild(SyncArgs),
    /// Semantic search over indexed chunks
    Search(SearchArgs),
    /// Answer a question from your notes
    Ask(AskArgs),
    /// Print the indexed chunks of one note
    Get(GetArgs),
    /// Inspect indexed notes
    Notes {
        #[command(subcommand)]
        action: NotesAction,
    },
    /// Show index statistics and configuration
    Status(StatusArgs),
    /// Read and change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// Register a directory of notes under a name
    Add {
        /// Path to the directory
        path: PathBuf,
        /// Collection name; becomes the prefix of every note id
        #[arg(long)]
        name: String,
    },
    /// Remove a collection and all its indexed data
    Remove {
        /// Name of the collection to remove
        name: String,
    },
    /// List all registered collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Sync / Rebuild --

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Only this collection
    #[arg(short = 'c', long)]
    pub collection: Option<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (default: single_hop_k setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Minimum score threshold (default: single_hop_min_score setting)
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Maximum results from one note (default: single_hop_max_per_document)
    #[arg(long)]
    pub per_note: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output only note ids (one per line)
    #[arg(long, conflicts_with = "json")]
    pub files: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub question: String,

    /// Skip concept expansion and answer from one retrieval pass
    #[arg(long)]
    pub single_hop: bool,

    /// Output the answer, citations and context ids as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Note id, `collection:relative/path.md`
    pub note_id: String,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

// -- Notes --

#[derive(Debug, Subcommand)]
pub enum NotesAction {
    /// List indexed notes, optionally filtered by a glob on the relative path
    List(NotesListArgs),
}

#[derive(Debug, Parser)]
pub struct NotesListArgs {
    /// Glob pattern applied to relative paths (e.g. "biology/**/*.md")
    pub pattern: Option<String>,

    /// Restrict to a specific collection
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Output as JSON array
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Settings --

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Persist a setting (see `settings list --all` for keys). Changing the
    /// model or chunking applies to existing notes only after `rebuild`
    Set { key: String, value: String },
    /// Print the stored value of a setting
    Get { key: String },
    /// List stored settings
    List {
        /// Include every known key with its description
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stored setting, reverting to the default
    Clear { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "hopnotes",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["hopnotes", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.count, None);
                assert_eq!(args.min_score, None);
                assert!(!args.json);
                assert!(!args.files);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_ask_single_hop() {
        let cli = Cli::parse_from([
            "hopnotes",
            "--data-dir",
            "/tmp/x",
            "ask",
            "--single-hop",
            "why?",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Command::Ask(args) => {
                assert!(args.single_hop);
                assert_eq!(args.question, "why?");
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["hopnotes", "-q", "-v", "status"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
