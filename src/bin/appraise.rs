//! appraise CLI: operator interface to the annotation task store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use appraise_rs::agreement;
use appraise_rs::batch::{BatchBuilder, BatchSelection, BuildOptions, ParallelCorpus};
use appraise_rs::config::{Config, Padding, campaigns_from_env};
use appraise_rs::engine::Engine;
use appraise_rs::import::read_entries;
use appraise_rs::model::{BatchId, Submission, SubmitOutcome, TaskId, TaskKind, TaskRef};
use appraise_rs::telemetry::{TelemetryConfig, init_telemetry};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "appraise", about = "Human evaluation tasks for machine translation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build batch descriptors from plain-text parallel files
    Build {
        /// Source segments, one per line
        #[arg(long)]
        source: PathBuf,
        /// Reference segments, line-aligned with the source
        #[arg(long)]
        reference: PathBuf,
        /// System output files (siblings `.ids` and `.bad` are picked up)
        #[arg(long = "system", required = true)]
        systems: Vec<PathBuf>,
        #[arg(long)]
        source_language: String,
        #[arg(long)]
        target_language: String,
        #[arg(long, value_enum, default_value_t = KindArg::SourceBased)]
        kind: KindArg,
        /// Campaign whose padding and annotation defaults apply
        #[arg(long)]
        campaign: Option<String>,
        /// Overrides the campaign default
        #[arg(long)]
        required_annotations: Option<u32>,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Batch numbers to emit (comma-separated); all when omitted
        #[arg(long, value_delimiter = ',')]
        batches: Vec<u32>,
        /// Drop the trailing partial batch, whatever the campaign says
        #[arg(long)]
        no_padding: bool,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import batch descriptor files (.json or .zip) as pending tasks
    Import {
        #[arg(long)]
        campaign: String,
        /// Batch name; defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Activate tasks
    Activate {
        #[command(subcommand)]
        target: ActivateTarget,
    },
    /// Withdraw a task from allocation
    Retire {
        /// Task ID (full UUID or prefix)
        task: String,
        #[arg(long, default_value = "admin")]
        by: String,
    },
    /// Show the task and item a user should work on next
    Next {
        #[arg(long)]
        user: String,
        #[arg(long)]
        campaign: String,
        #[arg(long)]
        language: String,
    },
    /// Submit a score for an item
    Submit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        item: String,
        #[arg(long)]
        score: u8,
        /// RFC 3339 start timestamp; defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 end timestamp; defaults to now
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// User group operations
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Agenda operations
    Agenda {
        #[command(subcommand)]
        action: AgendaAction,
    },
    /// List tasks with their progress
    Status {
        #[arg(long)]
        campaign: Option<String>,
    },
    /// Print events after a sequence number
    Events {
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Compute agreement over tab-separated judgment triples
    Agreement { file: PathBuf },
}

#[derive(Subcommand)]
enum ActivateTarget {
    /// Activate one pending task
    Task {
        task: String,
        #[arg(long, default_value = "admin")]
        by: String,
    },
    /// Activate every pending task of a batch
    Batch {
        batch: String,
        #[arg(long, default_value = "admin")]
        by: String,
        /// Mark the batch ready first
        #[arg(long)]
        mark_ready: bool,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Add a user to a group
    Add { user: String, group: String },
}

#[derive(Subcommand)]
enum AgendaAction {
    /// Append tasks to a user's agenda
    Assign {
        #[arg(long)]
        user: String,
        #[arg(long)]
        campaign: String,
        #[arg(required = true)]
        tasks: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    SourceBased,
    ReferenceBased,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::SourceBased => TaskKind::SourceBased,
            KindArg::ReferenceBased => TaskKind::ReferenceBased,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env();
    let telemetry = match &config {
        Ok(config) => TelemetryConfig::from_config(config),
        Err(_) => TelemetryConfig {
            endpoint: None,
            service_name: "appraise-rs".to_string(),
            log_level: "info".to_string(),
        },
    };
    let _guard = init_telemetry(telemetry)?;

    match cli.command {
        Command::Build {
            source,
            reference,
            systems,
            source_language,
            target_language,
            kind,
            campaign,
            required_annotations,
            seed,
            batches,
            no_padding,
            output,
        } => {
            let corpus = ParallelCorpus::load(&source, Some(&reference), &systems)?;
            let selection = if batches.is_empty() {
                BatchSelection::All
            } else {
                BatchSelection::Numbers(batches.into_iter().collect::<BTreeSet<_>>())
            };
            let mut options = match campaign {
                Some(name) => BuildOptions::for_campaign(
                    &campaigns_from_env()?.get(&name),
                    source_language,
                    target_language,
                ),
                None => BuildOptions::new(source_language, target_language),
            }
            .kind(kind.into())
            .seed(seed)
            .selection(selection);
            if let Some(n) = required_annotations {
                options = options.required_annotations(n);
            }
            if no_padding {
                options = options.padding(Padding::None);
            }
            let built = BatchBuilder::new(&corpus, options).build()?;
            let json = appraise_rs::batch::to_json(&built)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    eprintln!("Wrote {} batch(es) to {}", built.len(), path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        Command::Agreement { file } => cmd_agreement(&file),
        command => {
            let config = config?;
            let mut engine =
                Engine::open(&config.database_path)?.with_campaigns(config.campaigns()?);
            run(&mut engine, command)
        }
    }
}

/// Commands that operate on the task database.
fn run(engine: &mut Engine, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Import {
            campaign,
            name,
            files,
        } => {
            for file in files {
                // A bad file is reported and the remaining files still import.
                if let Err(e) = cmd_import(engine, &campaign, name.as_deref(), &file) {
                    eprintln!("{}: {e:#}", file.display());
                }
            }
            Ok(())
        }
        Command::Activate { target } => match target {
            ActivateTarget::Task { task, by } => {
                let id = resolve_task(engine, &task)?;
                let task = engine.activate_task(id, &by)?;
                println!("Activated: {} ({})", task.id.0, task.state());
                Ok(())
            }
            ActivateTarget::Batch {
                batch,
                by,
                mark_ready,
            } => {
                let id: BatchId = batch.parse().context("invalid batch ID")?;
                if mark_ready {
                    engine.mark_batch_ready(id)?;
                }
                let activated = engine.activate_batch(id, &by)?;
                println!("Activated {} task(s) in batch {}", activated.len(), id.0);
                Ok(())
            }
        },
        Command::Retire { task, by } => {
            let id = resolve_task(engine, &task)?;
            let task = engine.retire_task(id, &by)?;
            println!("Retired: {} ({})", task.id.0, task.state());
            Ok(())
        }
        Command::Next {
            user,
            campaign,
            language,
        } => {
            let Some(task) = engine.task_for_user(&user, &campaign, &language)? else {
                println!("No task available.");
                return Ok(());
            };
            let progress = engine.next_item(task.id, &user)?;
            println!("Task:  {} (batch {})", task.id.0, task.batch_number);
            println!(
                "Block: {} of 10 completed ({} items scanned)",
                progress.completed_in_block(),
                progress.completed_items
            );
            match progress.item {
                Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
                None => println!("Nothing left in this task."),
            }
            Ok(())
        }
        Command::Submit {
            user,
            task,
            item,
            score,
            start,
            end,
        } => {
            let now = Utc::now();
            let submission = Submission {
                task_id: resolve_task(engine, &task)?,
                item_id: item.parse().context("invalid item ID")?,
                score,
                start_time: start.unwrap_or(now),
                end_time: end.unwrap_or(now),
            };
            let outcome = engine.submit(&user, submission)?;
            println!(
                "{}",
                match outcome {
                    SubmitOutcome::Recorded => "Recorded.",
                    SubmitOutcome::Discarded => "Discarded: not the expected item.",
                    SubmitOutcome::Duplicate => "Already recorded.",
                }
            );
            Ok(())
        }
        Command::Group {
            action: GroupAction::Add { user, group },
        } => {
            engine.add_user_to_group(&user, &group)?;
            println!("Added {user} to {group}");
            Ok(())
        }
        Command::Agenda {
            action:
                AgendaAction::Assign {
                    user,
                    campaign,
                    tasks,
                },
        } => {
            let refs = tasks
                .iter()
                .map(|t| -> anyhow::Result<TaskRef> {
                    let id = resolve_task(engine, t)?;
                    let kind = engine.get_task(id)?.kind;
                    Ok(TaskRef { kind, id })
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let added = engine.assign_agenda(&user, &campaign, &refs)?;
            println!("Added {} task(s) to the agenda of {user}", added.len());
            Ok(())
        }
        Command::Status { campaign } => cmd_status(engine, campaign.as_deref()),
        Command::Events { since } => {
            for event in engine.get_events_since(since)? {
                println!(
                    "{:>6}  {}  {}",
                    event.seq,
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_string(&event.kind)?
                );
            }
            Ok(())
        }
        Command::Build { .. } | Command::Agreement { .. } => {
            anyhow::bail!("this command does not use the task database")
        }
    }
}

fn cmd_import(
    engine: &mut Engine,
    campaign: &str,
    name: Option<&str>,
    file: &Path,
) -> anyhow::Result<()> {
    let entries = read_entries(file)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string()),
    };
    let report = engine.import_batches(campaign, &name, entries)?;

    println!(
        "Batch {} ({name}): {} task(s) imported, {} skipped{}",
        report.batch_id.0,
        report.imported.len(),
        report.skipped.len(),
        if report.is_valid() { "" } else { "; batch is not valid" }
    );
    for skipped in &report.skipped {
        println!("  entry {}: {}", skipped.index, skipped.reason);
    }
    Ok(())
}

fn cmd_status(engine: &Engine, campaign: Option<&str>) -> anyhow::Result<()> {
    let tasks = engine.list_tasks(campaign)?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<12}  {:<5}  {:<9}  {:<9}  CREATED",
        "ID", "STATE", "CAMPAIGN", "BATCH", "LANGS", "PROGRESS"
    );
    println!("{}", "-".repeat(80));

    for task in &tasks {
        let assignees = engine.assignees(task.id)?.len();
        let annotated = engine.annotated_items(task.id)?;
        println!(
            "{:<8}  {:<10}  {:<12}  {:<5}  {:<9}  {:<9}  {}",
            task.id,
            task.state(),
            task.campaign,
            task.batch_number,
            format!("{}-{}", task.source_language, task.target_language),
            format!("{annotated}/{assignees}/{}", task.required_annotations),
            task.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} task(s); PROGRESS is annotated items/assignees/required", tasks.len());
    Ok(())
}

fn cmd_agreement(file: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let judgments = agreement::parse_judgments(&text)?;
    let scores = agreement::compute(&judgments);

    let show = |value: Option<f64>| match value {
        Some(v) => format!("{v:.3}"),
        None => "unavailable".to_string(),
    };
    println!("judgments           {}", judgments.len());
    println!("observed agreement  {}", show(scores.observed));
    println!("Bennett's S         {}", show(scores.bennett_s));
    println!("Scott's pi          {}", show(scores.scott_pi));
    println!("Cohen's kappa       {}", show(scores.cohen_kappa));
    println!("Krippendorff alpha  {}", show(scores.krippendorff_alpha));
    Ok(())
}

/// Accept a full task UUID or a unique prefix of one.
fn resolve_task(engine: &Engine, id: &str) -> anyhow::Result<TaskId> {
    if let Ok(id) = id.parse::<TaskId>() {
        return Ok(id);
    }
    let matches: Vec<TaskId> = engine
        .list_tasks(None)?
        .into_iter()
        .map(|task| task.id)
        .filter(|task| task.0.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no task matching '{id}'"),
        [only] => Ok(*only),
        many => anyhow::bail!("{} tasks match '{id}', be more specific", many.len()),
    }
}
