//! blogcaster CLI entry point.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use blogcaster::audio::list_outputs;
use blogcaster::backend::{BackendKind, SpeechBackend, create_backend};
use blogcaster::cli::{Args, Command, SubmitArgs};
use blogcaster::config::PipelineConfig;
use blogcaster::job::{Coordinator, Job, JobRequest, JobState};
use blogcaster::script::HttpScriptGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.command {
        Command::Submit(submit) => {
            if let Some(speed) = submit.speed {
                config.backends.speed = Some(speed);
            }
            if let Some(concurrency) = submit.concurrency {
                config.tts.concurrency = concurrency;
            }
            config.validate().context("Invalid configuration")?;
            let coordinator = build_coordinator(config)?;
            submit_job(&coordinator, &submit).await
        }
        Command::Status { job_id } => {
            let coordinator = build_coordinator(config)?;
            let job = coordinator
                .status(&job_id)
                .with_context(|| format!("Job '{job_id}' not found"))?;
            print_job(&job);
            Ok(())
        }
        Command::Cancel { job_id } => {
            let coordinator = build_coordinator(config)?;
            let job = coordinator
                .cancel(&job_id)
                .with_context(|| format!("Failed to cancel job '{job_id}'"))?;
            println!("Cancellation requested: {} ({})", job.id, job.state);
            Ok(())
        }
        Command::Resume { job_id } => {
            let coordinator = build_coordinator(config)?;
            println!("Resuming job: {job_id}");
            let job = run_with_interrupt(&coordinator, &job_id, true).await?;
            print_job(&job);
            Ok(())
        }
        Command::Jobs => {
            let coordinator = build_coordinator(config)?;
            list_jobs(&coordinator)
        }
        Command::List { output_dir } => {
            let dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
            list_audio(&dir)
        }
        Command::Health { backend } => check_health(backend, &config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "blogcaster=debug" } else { "blogcaster=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_coordinator(config: PipelineConfig) -> Result<Coordinator> {
    let generator = HttpScriptGenerator::new(config.generator.clone())
        .context("Failed to create script generator")?;
    let local = create_backend(BackendKind::Local, &config.backends)
        .context("Failed to create local speech backend")?;
    let cloud = create_backend(BackendKind::Cloud, &config.backends)
        .context("Failed to create cloud speech backend")?;

    let coordinator = Coordinator::new(config, Arc::new(generator))
        .context("Failed to open pipeline cache")?
        .with_backend(Arc::new(local))
        .with_backend(Arc::new(cloud));
    Ok(coordinator)
}

async fn submit_job(coordinator: &Coordinator, args: &SubmitArgs) -> Result<()> {
    let input = args.raw_input().context("Failed to read input")?;
    let voices = args.voice_binding().context("Invalid voice assignment")?;

    let mut request = JobRequest::new(input, args.style)
        .with_backend(args.backend)
        .with_voices(voices);
    if let Some(fallback) = args.fallback {
        request = request.with_fallback(fallback);
    }
    if let Some(dir) = &args.output_dir {
        request = request.with_output_dir(dir.clone());
    }

    let job = coordinator.submit(request).context("Failed to submit job")?;
    println!("Job submitted: {}", job.id);
    println!("  Style: {}", job.style().as_str());
    println!("  Backend: {}", job.request.backend);

    let job = run_with_interrupt(coordinator, &job.id, false).await?;
    print_job(&job);
    Ok(())
}

/// Run or resume a job, turning Ctrl-C into a cancellation request.
async fn run_with_interrupt(coordinator: &Coordinator, id: &str, resume: bool) -> Result<Job> {
    let mut progress = coordinator.subscribe(id);
    let reporter = tokio::spawn(async move {
        let mut last = None;
        while progress.changed().await.is_ok() {
            let current = *progress.borrow();
            if last != Some(current.state) {
                println!("  -> {}", current.state);
                last = Some(current.state);
            } else if current.state == JobState::SynthesizingAudio && current.turns_total > 0 {
                println!("     audio {}/{} turns", current.turns_done, current.turns_total);
            }
            if current.state.is_terminal() {
                break;
            }
        }
    });

    let run = async {
        if resume {
            coordinator.resume(id).await
        } else {
            coordinator.run(id).await
        }
    };
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, cancelling job {id}...");
                coordinator
                    .cancel(id)
                    .with_context(|| format!("Failed to cancel job '{id}'"))?;
            }
        }
    };

    reporter.abort();
    result.with_context(|| format!("Job '{id}' could not be run"))
}

fn print_job(job: &Job) {
    println!("Job {}", job.id);
    println!("  State: {}", job.state);
    println!("  Style: {}", job.style().as_str());
    println!("  Backend: {}", job.request.backend);
    if let Some(fallback) = job.request.fallback {
        println!("  Fallback: {fallback}");
    }
    if let Some(title) = &job.results.title {
        println!("  Title: {title}");
    }
    if job.results.turns_total > 0 {
        println!(
            "  Audio: {}/{} turns",
            job.results.clips.len(),
            job.results.turns_total
        );
    }
    println!("  Runs: {}", job.runs);
    if job.cancel_requested {
        println!("  Cancellation requested");
    }

    if let Some(failure) = &job.failure {
        println!("  Failed during {}: {} ({})", failure.stage, failure.message, failure.kind);
        if !failure.failed_turns.is_empty() {
            let turns: Vec<String> = failure.failed_turns.iter().map(|t| t.to_string()).collect();
            println!("  Failed turns: {}", turns.join(", "));
        }
        if job.state == JobState::Failed {
            println!("  Run `blogcaster resume {}` to retry", job.id);
        }
    }

    if let Some(artifact) = &job.results.artifact {
        println!("  Output: {}", artifact.audio_path.display());
        println!("  Duration: {:.2}s", artifact.total_duration_ms as f64 / 1000.0);
    }
}

fn list_jobs(coordinator: &Coordinator) -> Result<()> {
    let jobs = coordinator.jobs().context("Failed to list jobs")?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("Jobs:");
    for job in jobs {
        let created: DateTime<Local> = job.created_at.into();
        let title = job.results.title.as_deref().unwrap_or("-");
        println!(
            "  {} {} {:<18} {:<9} {}",
            created.format("%Y-%m-%d %H:%M"),
            job.id,
            job.state.as_str(),
            job.style().as_str(),
            title
        );
    }

    Ok(())
}

fn list_audio(dir: &Path) -> Result<()> {
    let files = list_outputs(dir)
        .with_context(|| format!("Failed to list audio in {}", dir.display()))?;

    if files.is_empty() {
        println!("No audio files in {}.", dir.display());
        return Ok(());
    }

    println!("Audio files in {}:", dir.display());
    for file in files {
        let modified: DateTime<Local> = file.modified.into();
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "  {} {:>10} {}",
            modified.format("%Y-%m-%d %H:%M"),
            format_size(file.size),
            name
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    }
}

async fn check_health(kind: BackendKind, config: &PipelineConfig) -> Result<()> {
    let backend = create_backend(kind, &config.backends)
        .with_context(|| format!("Failed to create {kind} backend"))?;
    let health = backend
        .health()
        .await
        .with_context(|| format!("{kind} backend is not reachable"))?;

    println!("Backend: {kind}");
    println!("  Status: {}", health.status);
    if let Some(model) = health.model {
        println!("  Model: {model}");
    }
    if let Some(device) = health.device {
        println!("  Device: {device}");
    }

    Ok(())
}
