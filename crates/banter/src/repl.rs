//! Interactive and file-driven script execution.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use banter_engine::runner::ScriptRunner;

const BANNER: &[&str] = &[
    "banter: scripted batch driving of the chat page.",
    "Statements separated by ';', commands start with '/'. Try '/help'.",
    "'history' recalls recent scripts; 'exit' or 'quit' leaves.",
    "Ctrl-C cancels the running script.",
];

const EXIT_COMMANDS: &[&str] = &["exit", "quit"];

/// Outcome of reading one REPL line.
enum ReadLine {
    /// A non-empty input line to process.
    Input(String),
    /// Empty line -- re-prompt.
    Skip,
    /// EOF or exit command -- leave the loop.
    Exit,
}

pub async fn run_repl(runner: Arc<ScriptRunner>) -> anyhow::Result<()> {
    for line in BANNER {
        println!("{line}");
    }

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        match classify(reader.next_line().await?) {
            ReadLine::Skip => continue,
            ReadLine::Exit => break,
            ReadLine::Input(line) if line == "history" => {
                let recent = runner.history().recent(10);
                if recent.is_empty() {
                    println!("No scripts in history");
                }
                for (i, script) in recent.iter().enumerate() {
                    println!("{:>3}  {script}", i + 1);
                }
            }
            ReadLine::Input(line) => run_cancellable(&runner, &line).await,
        }
    }
    Ok(())
}

fn classify(line: Option<String>) -> ReadLine {
    match line {
        None => ReadLine::Exit,
        Some(input) => {
            let trimmed = input.trim();
            if trimmed.is_empty() {
                ReadLine::Skip
            } else if EXIT_COMMANDS.contains(&trimmed) {
                ReadLine::Exit
            } else {
                ReadLine::Input(trimmed.to_string())
            }
        }
    }
}

/// Run one script, turning Ctrl-C into a cooperative cancel of the
/// run instead of killing the process. Outcomes and errors reach the
/// user through the runner's sinks; nothing is reported twice here.
async fn run_cancellable(runner: &ScriptRunner, line: &str) {
    let run = runner.run(line);
    tokio::pin!(run);
    loop {
        tokio::select! {
            result = &mut run => {
                let _ = result;
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling...");
                runner.cancel();
            }
        }
    }
}

/// Execute a script file, one script per line. Blank lines and `#`
/// comments are skipped; the first failing line stops the run.
pub async fn run_file(runner: Arc<ScriptRunner>, path: &str) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {path}"))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        runner
            .run(trimmed)
            .await
            .with_context(|| format!("executing line '{trimmed}'"))?;
    }
    Ok(())
}
