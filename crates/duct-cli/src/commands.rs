use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context as _};
use colored::Colorize;

use duct_index::{Context, Index, Report, Reports, StageStatus};
use duct_stage::{CancelToken, ShellRunner, Stage, StageFile, TomlStageStore};
use duct_store::{ArtifactStatus, LocalCache};

use crate::cli::*;
use crate::project::Project;
use crate::remote::{self, Direction};

pub fn run_command(cli: Cli, cwd: &Path, cancel: CancelToken) -> anyhow::Result<()> {
    match cli.command {
        Command::Init => cmd_init(cwd),
        Command::Stage(StageCommand::New(args)) => cmd_stage_new(cwd, args),
        command => {
            let mut project = Project::discover(cwd)?;
            project.config = project.config.with_overrides(cli.copy, cli.jobs);
            run_in_project(&project, cwd, command, cancel)
        }
    }
}

fn run_in_project(
    project: &Project,
    cwd: &Path,
    command: Command,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    match command {
        Command::Add(args) => cmd_add(project, cwd, args),
        Command::Remove(args) => cmd_remove(project, cwd, args),
        Command::Commit(args) => cmd_commit(project, cwd, args),
        Command::Checkout(args) => cmd_checkout(project, cwd, args),
        Command::Run(args) => cmd_run(project, cwd, args, cancel),
        Command::Status(args) => cmd_status(project, cwd, args),
        Command::Graph(args) => cmd_graph(project, cwd, args),
        Command::Push => remote::transfer(project, Direction::Push),
        Command::Fetch => remote::transfer(project, Direction::Fetch),
        Command::Fsck => cmd_fsck(project),
        Command::Init | Command::Stage(_) => unreachable!("handled before project discovery"),
    }
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Everything the graph commands borrow from.
struct Session {
    cache: LocalCache,
    stages: TomlStageStore,
    index: Index,
}

impl Session {
    /// Open the cache and load the index, re-reading every definition.
    fn open(project: &Project) -> anyhow::Result<Self> {
        let cache = LocalCache::new(project.cache_dir())
            .with_context(|| format!("failed to open cache {}", project.cache_dir().display()))?;
        let stages = TomlStageStore::new(&project.root);
        let mut index = project.load_index()?;
        index.reload(&stages).context("failed to reload stage definitions")?;
        Ok(Self {
            cache,
            stages,
            index,
        })
    }
}

fn context<'a>(project: &'a Project, cache: &'a LocalCache, stages: &'a TomlStageStore) -> Context<'a> {
    Context::new(&project.root, cache, stages)
        .with_strategy(project.config.strategy)
        .with_jobs(project.config.jobs())
}

fn stage_paths(project: &Project, cwd: &Path, paths: &[String]) -> anyhow::Result<Vec<String>> {
    paths.iter().map(|p| project.stage_path(cwd, p)).collect()
}

/// Print one line per stage and fail if any stage did not finish.
fn report<T>(reports: &Reports<T>, describe: impl Fn(&T) -> String) -> anyhow::Result<()> {
    let mut failed = 0;
    let mut blocked = 0;
    for (stage, r) in reports {
        match r {
            Report::Done(value) => println!("{} {}: {}", "✓".green(), stage.bold(), describe(value)),
            Report::Failed(err) => {
                failed += 1;
                println!("{} {}: {}", "✗".red().bold(), stage.bold(), err.to_string().red());
            }
            Report::Blocked(upstream) => {
                blocked += 1;
                println!("{} {}: blocked by {}", "-".yellow(), stage.bold(), upstream.yellow());
            }
        }
    }
    if failed + blocked > 0 {
        bail!("{failed} stage(s) failed, {blocked} blocked");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project and index maintenance
// ---------------------------------------------------------------------------

fn cmd_init(cwd: &Path) -> anyhow::Result<()> {
    let project = Project::init(cwd)?;
    println!(
        "{} Initialized duct project in {}",
        "✓".green().bold(),
        project.data_dir().display().to_string().bold()
    );
    Ok(())
}

fn cmd_stage_new(cwd: &Path, args: NewStageArgs) -> anyhow::Result<()> {
    let stage = Stage::from_paths(cwd, args.recursive, &args.outputs)?;
    let text = toml::to_string_pretty(&StageFile::from(&stage)).context("failed to encode stage")?;
    print!("{text}");
    Ok(())
}

fn cmd_add(project: &Project, cwd: &Path, args: PathsArgs) -> anyhow::Result<()> {
    let stages = TomlStageStore::new(&project.root);
    let mut index = project.load_index()?;
    for path in stage_paths(project, cwd, &args.paths)? {
        index.add(&stages, &path).with_context(|| format!("failed to add {path}"))?;
        println!("  {} {}", "tracking:".green(), path);
    }
    project.save_index(&index)
}

fn cmd_remove(project: &Project, cwd: &Path, args: PathsArgs) -> anyhow::Result<()> {
    let mut index = project.load_index()?;
    for path in stage_paths(project, cwd, &args.paths)? {
        index.remove(&path)?;
        println!("  {} {}", "removed:".yellow(), path);
    }
    project.save_index(&index)
}

// ---------------------------------------------------------------------------
// Graph operations
// ---------------------------------------------------------------------------

fn cmd_commit(project: &Project, cwd: &Path, args: StagesArgs) -> anyhow::Result<()> {
    let starts = stage_paths(project, cwd, &args.stages)?;
    let mut session = Session::open(project)?;
    let ctx = context(project, &session.cache, &session.stages);
    let reports = session.index.commit(&ctx, &starts)?;
    project.save_index(&session.index)?;
    report(&reports, |_| "committed".to_string())
}

fn cmd_checkout(project: &Project, cwd: &Path, args: StagesArgs) -> anyhow::Result<()> {
    let starts = stage_paths(project, cwd, &args.stages)?;
    let session = Session::open(project)?;
    let reports = session.index.checkout(&context(project, &session.cache, &session.stages), &starts)?;
    report(&reports, |_| "checked out".to_string())
}

fn cmd_run(
    project: &Project,
    cwd: &Path,
    args: StagesArgs,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let starts = stage_paths(project, cwd, &args.stages)?;
    let mut session = Session::open(project)?;
    let runner = ShellRunner::new(cancel);
    let ctx = context(project, &session.cache, &session.stages);
    let reports = session.index.run(&ctx, &runner, &starts)?;
    project.save_index(&session.index)?;
    report(&reports, |status| status.to_string())
}

fn cmd_status(project: &Project, cwd: &Path, args: StagesArgs) -> anyhow::Result<()> {
    let starts = stage_paths(project, cwd, &args.stages)?;
    let session = Session::open(project)?;
    let reports = session.index.status(&context(project, &session.cache, &session.stages), &starts)?;
    report(&reports, describe_status)
}

fn describe_status(status: &StageStatus) -> String {
    if status.is_up_to_date() {
        return "up to date".green().to_string();
    }
    let header = if status.locked { "changed" } else { "not locked" };
    let changed = |kind: &str, arts: &BTreeMap<String, ArtifactStatus>| {
        arts.iter()
            .filter(|(_, st)| !st.is_unchanged())
            .map(|(path, st)| format!("\n    {kind} {path}: {st}"))
            .collect::<String>()
    };
    format!(
        "{}{}{}",
        header.yellow(),
        changed("dependency", &status.dependencies),
        changed("output", &status.outputs)
    )
}

fn cmd_graph(project: &Project, cwd: &Path, args: GraphArgs) -> anyhow::Result<()> {
    let starts = stage_paths(project, cwd, &args.stages)?;
    let stages = TomlStageStore::new(&project.root);
    let mut index = project.load_index()?;
    index.reload(&stages).context("failed to reload stage definitions")?;
    let graph = index.graph_all(&starts, args.only_stages)?;
    print!("{graph}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache maintenance
// ---------------------------------------------------------------------------

fn cmd_fsck(project: &Project) -> anyhow::Result<()> {
    let cache = LocalCache::new(project.cache_dir())?;
    let problems = cache.fsck()?;
    if problems.is_empty() {
        println!("{} No issues.", "✓".green().bold());
        return Ok(());
    }
    for problem in &problems {
        println!("{} {}", "✗".red().bold(), problem);
    }
    bail!("{} corrupt object(s) in {}", problems.len(), cache.root().display())
}
