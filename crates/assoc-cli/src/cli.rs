use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "assoc",
    about = "Associative blob store with transactional metadata",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store root holding blobs/, temp/ and lock files
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Backing store as <provider>:<parameters>
    #[arg(long, global = true)]
    pub data_source: Option<String>,

    /// Isolation level used to commit the session
    #[arg(long, global = true)]
    pub isolation: Option<String>,

    /// TOML configuration file; flags override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Remove stale lock files before opening the store
    #[arg(long, global = true)]
    pub clear_locks: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty file and print its uuid
    Create,
    /// Store standard input as the content of a blob, adding it if needed
    Store(StoreArgs),
    /// Print the content of a blob
    Cat(BlobArgs),
    /// List the blobs of a file
    Ls(FileArgs),
    /// Remove blobs, or the whole file when no blob is named
    Rm(RmArgs),
    /// List, add or remove metadata triples of a blob
    Metadata(MetadataArgs),
    /// Look up or register a predicate prefix
    MetaPrefix(MetaPrefixArgs),
    /// Look up or register an object type
    MetaType(MetaTypeArgs),
    /// Run raw SQL against the backing store
    QueryDb(QueryDbArgs),
    /// Reconcile sessions left behind by dead processes
    Recover,
    /// Compare the blob tree with the backing store
    Check,
    /// List the available actions
    ListActions,
}

#[derive(Args)]
pub struct FileArgs {
    /// UUID of the file
    #[arg(long)]
    pub uuid: String,
}

#[derive(Args)]
pub struct BlobArgs {
    /// UUID of the file
    #[arg(long)]
    pub uuid: String,
    /// Name of the blob
    #[arg(long)]
    pub blob_name: String,
}

#[derive(Args)]
pub struct StoreArgs {
    #[command(flatten)]
    pub blob: BlobArgs,
    /// Content type of a newly added blob
    #[arg(long, default_value = "text/plain")]
    pub content_type: String,
}

#[derive(Args)]
pub struct RmArgs {
    /// UUID of the file
    #[arg(long)]
    pub uuid: String,
    /// Blob to remove; repeatable
    #[arg(long)]
    pub blob_name: Vec<String>,
}

#[derive(Args)]
pub struct MetadataArgs {
    #[command(subcommand)]
    pub action: MetadataAction,
}

#[derive(Subcommand)]
pub enum MetadataAction {
    /// Print the triples of a blob
    List {
        #[command(flatten)]
        blob: BlobArgs,
        /// Show full URIs and object types
        #[arg(long)]
        uris: bool,
    },
    /// Attach a triple with a literal or blob object
    Add(AddTripleArgs),
    /// Remove a triple by id
    Remove {
        #[command(flatten)]
        blob: BlobArgs,
        /// Id of the triple
        #[arg(long)]
        id: u64,
    },
}

#[derive(Args)]
pub struct AddTripleArgs {
    #[command(flatten)]
    pub blob: BlobArgs,
    /// Short name of the predicate prefix
    #[arg(long)]
    pub predicate_prefix: String,
    #[arg(long)]
    pub predicate: String,
    /// Short name of the object type's prefix
    #[arg(long, requires = "object", conflicts_with = "object_uuid")]
    pub object_prefix: Option<String>,
    /// Name of the object type
    #[arg(long, requires = "object", conflicts_with = "object_uuid")]
    pub object_type: Option<String>,
    /// Literal object
    #[arg(long, requires_all = ["object_prefix", "object_type"])]
    pub object: Option<String>,
    /// UUID of the file holding the object blob
    #[arg(long, requires = "object_blob_name", conflicts_with = "object")]
    pub object_uuid: Option<String>,
    /// Name of the object blob
    #[arg(long, requires = "object_uuid")]
    pub object_blob_name: Option<String>,
}

#[derive(Args)]
pub struct MetaPrefixArgs {
    /// Short name of the prefix
    #[arg(long)]
    pub name: String,
    /// URI to register; omit to look up an existing prefix
    #[arg(long)]
    pub uri: Option<String>,
}

#[derive(Args)]
pub struct MetaTypeArgs {
    /// Short name of the type's prefix
    #[arg(long)]
    pub prefix: String,
    #[arg(long)]
    pub name: String,
}

#[derive(Args)]
pub struct QueryDbArgs {
    pub sql: String,
}
