//! Quill CLI - long-document generation over a flaky chat backend
//!
//! Usage:
//!   quill init                  Write default config to .quill/config.toml
//!   quill run <subject>         Submit and run a generation job
//!   quill resume <job>          Resume an interrupted job
//!   quill status <job>          Show state, progress, and artifact path
//!   quill list                  List all jobs
//!   quill events <job>          Print a job's event log
//!   quill fork <job>            Fork a job's spec into a fresh job
//!   quill doctor                Check backend health
//!
//! While `run` or `resume` is in the foreground, control commands are read
//! from stdin, one per line: `pause`, `resume`, `next [steering text]`,
//! `cancel`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_core::{BackendKind, ControlMessage, LengthPreset, QuillConfig, RunSpec, SpanPreset};
use quill_engine::JobService;
use quill_transport::{build_transport, Transport};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "quill")]
#[command(author, version, about = "Chunked long-document generation engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration to .quill/config.toml
    Init,

    /// Submit a job and run it to completion
    Run {
        /// Subject of the document
        subject: String,

        /// Length preset: standard, long, very-long, max
        #[arg(long, default_value = "long")]
        length: LengthPreset,

        /// Span preset: medium, long, book
        #[arg(long, default_value = "book")]
        span: SpanPreset,

        /// Overlay names recorded on the job
        #[arg(long = "overlay")]
        overlays: Vec<String>,

        /// File whose contents become the system text
        #[arg(long)]
        system_file: Option<PathBuf>,

        /// Backend: bridge or direct
        #[arg(long, default_value = "bridge")]
        backend: BackendKind,

        /// Model selector passed to the backend
        #[arg(long, default_value = "default")]
        model: String,

        /// Output artifact path (default books/<subject>.md)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Source files for a source-grounded run
        #[arg(long = "source")]
        sources: Vec<PathBuf>,

        /// Override the span preset's chunk budget
        #[arg(long)]
        chunks: Option<usize>,

        /// Start fresh even if a resumable job targets the same output
        #[arg(long)]
        overwrite: bool,
    },

    /// Resume an interrupted job by id
    Resume {
        job_id: String,
    },

    /// Show a job's state, progress, and artifact
    Status {
        job_id: String,
    },

    /// List all jobs
    List,

    /// Print a job's event log
    Events {
        job_id: String,
    },

    /// Fork a job's spec into a fresh pending job
    Fork {
        job_id: String,
    },

    /// Check that the selected backend is reachable
    Doctor {
        /// Backend: bridge or direct
        #[arg(long, default_value = "bridge")]
        backend: BackendKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = QuillConfig::load_or_default(std::path::Path::new("."))?;

    match cli.command {
        Commands::Init => {
            QuillConfig::write_default(std::path::Path::new("."))?;
            println!("Wrote .quill/config.toml");
            Ok(())
        }

        Commands::Run {
            subject,
            length,
            span,
            overlays,
            system_file,
            backend,
            model,
            out,
            sources,
            chunks,
            overwrite,
        } => {
            let mut spec = RunSpec::new(subject);
            spec.length = length;
            spec.span = span;
            spec.overlays = overlays;
            spec.backend = backend;
            spec.model = model;
            spec.out_path = out;
            spec.extra_files = sources;
            spec.chunk_budget = chunks;
            if let Some(path) = system_file {
                spec.system_text = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read system file {}", path.display()))?;
            }

            let service = Arc::new(JobService::new(config)?);
            let (job_id, resumed) = if overwrite {
                (service.submit(spec)?, false)
            } else {
                service.submit_or_resume(spec)?
            };
            if resumed {
                println!("Resuming job {}", job_id);
            } else {
                println!("Submitted job {}", job_id);
            }

            run_foreground(service, job_id).await
        }

        Commands::Resume { job_id } => {
            let service = Arc::new(JobService::new(config)?);
            run_foreground(service, job_id).await
        }

        Commands::Status { job_id } => {
            let service = JobService::new(config)?;
            let snapshot = service.query(&job_id)?;
            println!("{}  {}", snapshot.id, snapshot.state);
            println!("  subject:  {}", snapshot.spec.subject);
            println!("  progress: {}/{} chunks", snapshot.chunks_done, snapshot.chunk_budget);
            if let Some(artifact) = &snapshot.artifact {
                println!("  artifact: {}", artifact.display());
            }
            if let Some(error) = &snapshot.error {
                println!("  error:    {}", error);
            }
            Ok(())
        }

        Commands::List => {
            let service = JobService::new(config)?;
            let mut jobs = service.list()?;
            jobs.sort_by_key(|j| j.created_at);
            for job in jobs {
                println!(
                    "{}  {:9}  {:>2}/{:<2}  {}",
                    job.id, job.state.to_string(), job.chunks_done, job.chunk_budget, job.spec.subject
                );
            }
            Ok(())
        }

        Commands::Events { job_id } => {
            let service = JobService::new(config)?;
            for record in service.events(&job_id)? {
                println!("{}  {:?}", record.ts.format("%Y-%m-%dT%H:%M:%S"), record.kind);
            }
            Ok(())
        }

        Commands::Fork { job_id } => {
            let service = JobService::new(config)?;
            let fork_id = service.fork(&job_id)?;
            println!("Forked {} -> {}", job_id, fork_id);
            Ok(())
        }

        Commands::Doctor { backend } => {
            let transport = build_transport(backend, "default", &config)?;
            if transport.health_check().await {
                println!("{}: healthy", transport.name());
                Ok(())
            } else {
                println!("{}: UNREACHABLE", transport.name());
                std::process::exit(1);
            }
        }
    }
}

/// Run a job in the foreground, steering it from stdin
async fn run_foreground(service: Arc<JobService>, job_id: String) -> Result<()> {
    let stdin_task = spawn_control_reader(service.clone(), job_id.clone());

    let snapshot = service.run(&job_id).await?;
    stdin_task.abort();

    println!(
        "Job {} finished: {} ({}/{} chunks)",
        snapshot.id, snapshot.state, snapshot.chunks_done, snapshot.chunk_budget
    );
    if let Some(artifact) = &snapshot.artifact {
        println!("Artifact: {}", artifact.display());
    }
    if let Some(error) = &snapshot.error {
        println!("Error: {}", error);
    }
    Ok(())
}

/// Read control commands from stdin while a run is in the foreground
fn spawn_control_reader(service: Arc<JobService>, job_id: String) -> tokio::task::JoinHandle<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message = match parse_control_line(&line) {
                Some(message) => message,
                None => {
                    warn!("unrecognized control command: {}", line.trim());
                    continue;
                }
            };
            if let Err(e) = service.control(&job_id, message) {
                warn!("control command not delivered: {}", e);
            }
        }
    })
}

fn parse_control_line(line: &str) -> Option<ControlMessage> {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("pause") {
        return Some(ControlMessage::Pause);
    }
    if trimmed.eq_ignore_ascii_case("resume") {
        return Some(ControlMessage::Resume);
    }
    if trimmed.eq_ignore_ascii_case("cancel") {
        return Some(ControlMessage::Cancel);
    }
    if let Some(rest) = trimmed
        .strip_prefix("next")
        .or_else(|| trimmed.strip_prefix("NEXT"))
    {
        let text = rest.trim();
        return Some(ControlMessage::Next {
            text: if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            },
        });
    }
    None
}
