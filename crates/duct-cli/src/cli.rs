use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "duct", about = "duct: versioned data and cached pipelines", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log every cache and stage action
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Check out copies instead of links to cache objects
    #[arg(long, global = true)]
    pub copy: bool,

    /// Maximum number of stages processed at once
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a duct project in the current directory
    Init,
    /// Track stage definition files
    Add(PathsArgs),
    /// Stop tracking stage definition files
    Remove(PathsArgs),
    /// Work with stage definitions
    #[command(subcommand)]
    Stage(StageCommand),
    /// Store stage outputs in the cache and write lock files
    Commit(StagesArgs),
    /// Restore stage outputs from the cache
    Checkout(StagesArgs),
    /// Run stale stages, upstream first
    Run(StagesArgs),
    /// Compare stage artifacts with their recorded checksums
    Status(StagesArgs),
    /// Print the stage graph in Graphviz format
    Graph(GraphArgs),
    /// Upload cache objects to the configured remote
    Push,
    /// Download cache objects from the configured remote
    Fetch,
    /// Check every cache object against its checksum
    Fsck,
}

#[derive(Subcommand)]
pub enum StageCommand {
    /// Print an output-only stage definition for the given paths
    New(NewStageArgs),
}

#[derive(Args)]
pub struct PathsArgs {
    #[arg(required = true)]
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct StagesArgs {
    /// Stage definition files (all tracked stages when omitted)
    pub stages: Vec<String>,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Stage definition files (all tracked stages when omitted)
    pub stages: Vec<String>,
    /// Draw one node per stage instead of per artifact
    #[arg(long)]
    pub only_stages: bool,
}

#[derive(Args)]
pub struct NewStageArgs {
    #[arg(required = true)]
    pub outputs: Vec<String>,
    /// Track sub-directories of directory outputs
    #[arg(short, long)]
    pub recursive: bool,
}
