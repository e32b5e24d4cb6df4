use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::TreeKind;

/// Command-line arguments for the pubcache binary.
#[derive(Debug, Parser)]
#[command(name = "pubcache", version, about = "Published content cache tooling")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PUBCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load the content tree and write the snapshot file.
    Warm(WarmArgs),
    /// Regenerate the serialized rows in the database, then reload the tree.
    Rebuild(RebuildArgs),
    /// Resolve nodes and routes against the loaded tree.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the snapshot file location.
    #[arg(
        long = "cache-file-path",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub cache_file_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    /// Ignore any existing snapshot file and load from the database.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub from_database: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RebuildArgs {
    /// Number of rows regenerated per batch.
    #[arg(long = "group-size", default_value_t = 5000, value_parser = clap::value_parser!(usize))]
    pub group_size: usize,

    /// Restrict the rebuild to these content types (repeatable).
    #[arg(long = "content-type-id", value_name = "ID")]
    pub content_type_ids: Vec<i32>,

    /// Tree to rebuild.
    #[arg(long, value_enum, default_value_t = TreeArg::Content)]
    pub tree: TreeArg,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InspectArgs {
    /// Node id to look up.
    #[arg(long)]
    pub id: Option<i32>,

    /// Route to resolve, e.g. `/about/team` or `1234/news`.
    #[arg(long)]
    pub route: Option<String>,

    /// Overlay unpublished changes for the looked up node.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub preview: bool,

    /// List the children of the node (or the top-level nodes).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub children: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TreeArg {
    Content,
    Media,
    Member,
}

impl From<TreeArg> for TreeKind {
    fn from(value: TreeArg) -> Self {
        match value {
            TreeArg::Content => TreeKind::Content,
            TreeArg::Media => TreeKind::Media,
            TreeArg::Member => TreeKind::Member,
        }
    }
}
