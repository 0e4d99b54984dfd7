//! CLI entry point for Mnemo: build note memory, search it, and chat with a local model.

mod repl;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use mnemo_core::diagnostics::{self, CheckResult};
use mnemo_core::models::{find_models, is_current, resolve_selection};
use mnemo_core::{
    app_data_dir, build_memory, scan_notes, status, watch_notes, Assistant, BuildError, Embedder,
    IndexPaths, LlamaCli, MemoryIndex, Project, StoreError,
};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mnemo", version)]
#[command(about = "Mnemo: local notes memory and assistant on llama.cpp")]
struct Cli {
    /// Project root holding config.json, notes/, model/ and memory/.
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show project status: config, notes, memory, model.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show where Mnemo looks for a user-level config.
    DataDir,
    /// Scan a directory for notes and list them (defaults to the project's notes dir).
    Scan {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Summarize and embed all notes into memory (incremental).
    Build,
    /// Build memory, then rebuild whenever a note changes.
    Watch,
    /// Show the note summaries closest to a query.
    Search {
        query: String,
        /// Number of results (defaults to retrieval.top_k).
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Ask a single question and print the answer.
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Interactive chat with note memory.
    Chat {
        /// Directory for session transcripts (defaults to log_dir from config).
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,
    },
    /// List model files in the model directory.
    Models,
    /// Select a model by number (from `models`) or file name and save it to the config.
    UseModel {
        #[arg(value_name = "NAME|NUMBER")]
        choice: String,
    },
    /// Check the llama.cpp setup, or run diagnostic prompts.
    Diagnose {
        /// Prompt to run.
        #[arg(long)]
        prompt: Option<String>,
        /// File with prompts, one per line (# for comments).
        #[arg(long, value_name = "FILE")]
        prompts_file: Option<PathBuf>,
        /// Max tokens to generate per prompt.
        #[arg(short, long, default_value_t = 64)]
        n: u32,
        /// Override the model path.
        #[arg(long, value_name = "FILE")]
        model: Option<PathBuf>,
        /// Run the binary and model-load checks (default when no prompt is given).
        #[arg(long)]
        setup_test: bool,
    },
}

#[derive(Serialize)]
struct StatusReport {
    core: &'static str,
    root: PathBuf,
    config_file: Option<PathBuf>,
    notes_dir: PathBuf,
    notes: Option<usize>,
    memory_records: Option<usize>,
    embedder: Option<String>,
    model: PathBuf,
    model_exists: bool,
    llama_cli: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut project = Project::open(&cli.root)
        .with_context(|| format!("failed to open project at {}", cli.root.display()))?;

    // Logs go to stderr so answers on stdout stay clean.
    let filter = EnvFilter::try_new(&project.config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Status { json: false }) {
        Commands::Status { json } => print_status(&project, json)?,
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Scan { path } => {
            let path = path.unwrap_or_else(|| project.notes_dir());
            let notes = scan_notes(&path)?;
            println!("Scanned {} note(s) under {}", notes.len(), path.display());
            for n in notes {
                let title = n
                    .meta
                    .title
                    .clone()
                    .unwrap_or_else(|| n.body.lines().next().unwrap_or("").trim().to_string());
                println!("  {}  {}", n.source, preview(&title, 60));
            }
        }
        Commands::Build => {
            let embedder = Embedder::from_config(&project.config.embedding)?;
            run_build(&project, &embedder).await?;
        }
        Commands::Watch => watch(project).await?,
        Commands::Search { query, k, json } => search(&project, &query, k, json).await?,
        Commands::Ask { question } => {
            let question = question.join(" ");
            let mut assistant = Assistant::for_project(&project);
            match repl::answer_with_spinner(&mut assistant, &question).await {
                Some(Ok(answer)) => {
                    println!("{}", answer.text);
                    for h in &answer.sources {
                        eprintln!("  source: {} ({:.3})", h.record.source, h.score);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => eprintln!("Interrupted."),
            }
        }
        Commands::Chat { log_dir } => {
            let log_dir = log_dir.map_or_else(|| project.log_dir(), |d| project.resolve(&d.to_string_lossy()));
            repl::run(&project, &log_dir).await?;
        }
        Commands::Models => {
            let dir = project.model_dir();
            let models = find_models(&dir);
            if models.is_empty() {
                println!("No models found in {}", dir.display());
                println!("  Place your .gguf, .bin, or .safetensors files there.");
            } else {
                let current = project.model_path();
                println!("Current model: {}", current.display());
                for (i, m) in models.iter().enumerate() {
                    let marker = if is_current(m, &current) { " ✓" } else { "" };
                    let name = m.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
                    println!("  {}. {}{}", i + 1, name, marker);
                }
            }
        }
        Commands::UseModel { choice } => {
            let models = find_models(&project.model_dir());
            let Some(model) = resolve_selection(&models, &choice).cloned() else {
                bail!("no model matches {choice:?}; run `mnemo models` to list them");
            };
            let saved = project.set_model_path(&model)?;
            println!("Switched to {} (saved to {})", model.display(), saved.display());
        }
        Commands::Diagnose {
            prompt,
            prompts_file,
            n,
            model,
            setup_test,
        } => {
            let mut llama = LlamaCli::from_project(&project);
            if let Some(m) = model {
                llama = LlamaCli::new(llama.binary(), project.resolve(&m.to_string_lossy()), llama.options().clone());
            }
            diagnose(&llama, prompt, prompts_file.as_deref(), n, setup_test).await?;
        }
    }
    Ok(())
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

fn print_status(project: &Project, json: bool) -> Result<()> {
    let memory = MemoryIndex::load(&IndexPaths::from_project(project)).ok();
    let report = StatusReport {
        core: status(),
        root: project.root.clone(),
        config_file: project.config_file().map(Path::to_path_buf),
        notes_dir: project.notes_dir(),
        notes: scan_notes(&project.notes_dir()).ok().map(|n| n.len()),
        memory_records: memory.as_ref().map(MemoryIndex::len),
        embedder: memory.as_ref().map(|m| m.embedder().to_string()),
        model: project.model_path(),
        model_exists: project.model_path().is_file(),
        llama_cli: project.llama_binary(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Mnemo");
    println!("  core:    {}", report.core);
    println!("  root:    {}", report.root.display());
    match &report.config_file {
        Some(p) => println!("  config:  {}", p.display()),
        None => println!("  config:  defaults (no config.json)"),
    }
    match report.notes {
        Some(n) => println!("  notes:   {} in {}", n, report.notes_dir.display()),
        None => println!("  notes:   {} missing", report.notes_dir.display()),
    }
    match (report.memory_records, &report.embedder) {
        (Some(n), Some(e)) => println!("  memory:  {n} summaries ({e})"),
        _ => println!("  memory:  not built"),
    }
    let missing = if report.model_exists { "" } else { " (missing)" };
    println!("  model:   {}{}", report.model.display(), missing);
    println!("  llama:   {}", report.llama_cli.display());
    Ok(())
}

async fn run_build(project: &Project, embedder: &Embedder) -> Result<()> {
    let report = build_memory(project, embedder).await?;
    println!(
        "Built memory from {} note(s): {} chunk(s), {} summarized, {} reused, {} fallback(s).",
        report.notes, report.chunks, report.summarized, report.reused, report.fallbacks
    );
    Ok(())
}

async fn watch(project: Project) -> Result<()> {
    let embedder = Embedder::from_config(&project.config.embedding)?;
    match run_build(&project, &embedder).await {
        Err(e) if matches!(e.downcast_ref::<BuildError>(), Some(BuildError::NoNotes(_))) => {
            info!("{e}");
        }
        other => other?,
    }
    let notes_dir = project.notes_dir();
    println!("Watching {} for changes (Ctrl-C to stop)...", notes_dir.display());

    let handle = tokio::runtime::Handle::current();
    let shared = (project, embedder);
    tokio::task::spawn_blocking(move || {
        watch_notes(&notes_dir, move |changed| {
            info!(files = changed.len(), "notes changed; rebuilding memory");
            let (project, embedder) = &shared;
            if let Err(e) = handle.block_on(run_build(project, embedder)) {
                error!("rebuild failed: {e:#}");
            }
        })
    })
    .await??;
    Ok(())
}

async fn search(project: &Project, query: &str, k: Option<usize>, json: bool) -> Result<()> {
    let embedder = Embedder::from_config(&project.config.embedding)?;
    let memory = match MemoryIndex::load(&IndexPaths::from_project(project)) {
        Ok(m) => m,
        Err(StoreError::NotBuilt(path)) => {
            bail!("no memory at {}; run `mnemo build` first", path.display())
        }
        Err(e) => return Err(e).context("failed to load memory"),
    };
    if memory.embedder() != embedder.fingerprint() {
        bail!(
            "memory was built with {} but the config uses {}; run `mnemo build`",
            memory.embedder(),
            embedder.fingerprint()
        );
    }
    let q = embedder.embed(query).await?;
    let hits = memory.search(&q, k.unwrap_or(project.config.retrieval.top_k));
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
    }
    for h in hits {
        println!("[{:.3}] {}#{}  {}", h.score, h.record.source, h.record.chunk_index, h.record.summary);
    }
    Ok(())
}

async fn diagnose(
    llama: &LlamaCli,
    prompt: Option<String>,
    prompts_file: Option<&Path>,
    n: u32,
    setup_test: bool,
) -> Result<()> {
    let mut prompts: Vec<String> = prompt.into_iter().collect();
    if let Some(path) = prompts_file {
        let s = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        prompts.extend(
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut results: Vec<CheckResult> = Vec::new();
    if setup_test || prompts.is_empty() {
        let binary = diagnostics::check_binary(llama).await;
        let binary_ok = binary.ok;
        report_check(&binary);
        results.push(binary);
        if binary_ok {
            let load = diagnostics::check_model_load(llama).await;
            report_check(&load);
            results.push(load);
        }
    }
    for p in &prompts {
        println!("[run] {}", preview(p, 80));
        let r = diagnostics::ping(llama, p, n).await;
        report_check(&r);
        results.push(r);
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        bail!("{failed} check(s) failed");
    }
    Ok(())
}

fn report_check(r: &CheckResult) {
    let verdict = if r.ok { "ok" } else { "fail" };
    println!("[check] {} … {}", r.name, verdict);
    if !r.detail.is_empty() {
        println!("        {}", r.detail);
    }
}
