use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::Ordering;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use video_collector::core::progress_tracker::ProgressEvent;
use video_collector::utils::init_tracing;
use video_collector::{parse_url_list, EngineConfig, JobStatus, ParsedUrlList, ReassemblyEngine};

mod cli;

use cli::CliArgs;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e:#}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.verbose);
    info!("🎬 {} v{}", video_collector::NAME, video_collector::VERSION);

    let config = load_config(&args)?;
    let input = read_input(args.input.as_deref()).await?;

    let urls = parse_url_list(&input);
    match &urls {
        ParsedUrlList::Json(list) => info!("Read {} URL(s) from JSON input", list.len()),
        ParsedUrlList::Lines(list) => info!("Read {} URL(s) from line input", list.len()),
    }
    if urls.is_empty() {
        anyhow::bail!("no http(s) URLs found in input");
    }

    let mut snapshot = urls.into_snapshot();
    snapshot.page_url = args.page_url.clone();
    snapshot.title = args.title.clone();

    let mut engine = ReassemblyEngine::new(config).context("Failed to create engine")?;

    if args.dry_run {
        let plan = engine.plan_page(&snapshot);
        let rendered = serde_json::json!({ "jobs": plan.jobs, "notes": plan.notes });
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    if !engine.orchestrator().check_mux_tool().await {
        warn!(
            "Media tool `{}` is not available; jobs that need muxing will fail",
            engine.config().mux.tool_path
        );
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.set_event_sender(tx);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Overall {
                    completed,
                    failed,
                    total,
                } => info!("Overall: {} done, {} failed, {} total", completed, failed, total),
                ProgressEvent::JobProgress(snapshot) => match snapshot.state.fraction() {
                    Some(fraction) => info!("{}: {:.1}%", snapshot.job_id, fraction * 100.0),
                    None => info!("{}: {} (total unknown)", snapshot.job_id, snapshot.state.completed),
                },
                _ => {}
            }
        }
    });

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let report = engine.run_page(&snapshot).await;
    drop(engine);
    let _ = printer.await;

    for job in &report.jobs {
        match job.status {
            JobStatus::Succeeded => {
                let output = job
                    .output_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                println!("ok     {} [{}] {}", job.id, job.strategy, output);
                for warning in &job.warnings {
                    println!("       warning: {}", warning);
                }
            }
            _ => println!(
                "failed {} [{}] {}",
                job.id,
                job.strategy,
                job.failure_reason().unwrap_or_default()
            ),
        }
    }

    if report.failed() > 0 {
        anyhow::bail!("{} of {} job(s) failed", report.failed(), report.jobs.len());
    }
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load().unwrap_or_else(|err| {
            warn!("Failed to load configuration: {}. Using defaults", err);
            EngineConfig::default()
        }),
    };

    if let Some(dir) = &args.output_dir {
        config.output_directory = dir.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.download.concurrent_jobs = concurrency;
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.mux.tool_path = ffmpeg.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read URL list: {:?}", path)),
        _ => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .context("Failed to read URL list from stdin")?;
            Ok(input)
        }
    }
}
