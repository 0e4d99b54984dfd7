//! Interactive chat loop on stdin/stdout.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use mnemo_core::{parse_input, Answer, Assistant, ChatError, Input, Project, SessionLog};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Spinner shown while llama.cpp is generating.
pub fn thinking_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("AI: Thinking… {elapsed} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["|", "/", "-", "\\", ""]),
    );
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

/// Run one turn with an optional spinner. `None` means the user pressed Ctrl-C.
pub async fn answer_with_spinner(
    assistant: &mut Assistant,
    question: &str,
) -> Option<Result<Answer, ChatError>> {
    let spinner = assistant.session.settings.thinking.then(thinking_spinner);
    let result = tokio::select! {
        r = assistant.answer(question) => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result
}

pub async fn run(project: &Project, log_dir: &Path) -> Result<()> {
    let mut assistant = Assistant::for_project(project);
    let mut log = SessionLog::create(log_dir)
        .with_context(|| format!("failed to create session log in {}", log_dir.display()))?;

    println!("[info] logging to {}", log.path().display());
    if assistant.has_memory() {
        println!("[info] note memory: {} summaries", assistant.memory_len());
    } else {
        println!("[info] note memory: off (run `mnemo build` to enable)");
    }
    println!("Local AI ready. Type your message (Ctrl-C to quit, /help for commands).\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = parse_input(&line);
        if input != Input::Empty {
            log.user(line.trim());
        }
        match input {
            Input::Empty => continue,
            Input::Exit => {
                println!("Goodbye!");
                break;
            }
            Input::Message(question) => {
                if !turn(&mut assistant, &mut log, &question).await {
                    println!("\nShutting down...");
                    break;
                }
            }
            command => {
                for info in assistant.apply(&command) {
                    println!("[info] {info}");
                    log.info(&info);
                }
            }
        }
    }
    log.info("session ended");
    Ok(())
}

/// Returns false when the user interrupted generation.
async fn turn(assistant: &mut Assistant, log: &mut SessionLog, question: &str) -> bool {
    if assistant.session.settings.debug {
        log.debug(&format!("llama-cli: {}", assistant.describe_command()));
    }
    let Some(result) = answer_with_spinner(assistant, question).await else {
        log.info("generation interrupted");
        return false;
    };
    match result {
        Ok(answer) => {
            log.llama_output(&answer.stdout, &answer.stderr);
            println!("AI: {}\n", answer.text);
            log.assistant(&answer.text);
            if !answer.sources.is_empty() {
                let sources: Vec<&str> = answer.sources.iter().map(|h| h.record.source.as_str()).collect();
                log.info(&format!("sources: {}", sources.join(", ")));
            }
        }
        Err(e) => {
            println!("[error] {e}\n");
            log.turn_error(&e);
        }
    }
    true
}
