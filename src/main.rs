use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use ie_assistant::store::{Table, TurnBudget};
use ie_assistant::tasks::{Conversation, ProgressSink};
use ie_assistant::{bootstrap, config, logging, Assistant};

const EXIT_COMMANDS: &[&str] = &[":quit", ":exit", "exit", "quit"];

fn main() -> Result<()> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let (config, config_path) = config::load_or_default(&cwd)?;

    let data_dir = logging::data_dir();
    let log_path = logging::init_tracing(&data_dir, &config.logging)
        .with_context(|| format!("cannot set up logging in {}", data_dir.display()))?;
    tracing::info!(
        config = %config_path.as_deref().map_or("defaults".into(), |p| p.display().to_string()),
        data_dir = %data_dir.display(),
        "configuration loaded"
    );

    // Blocking HTTP clients must be created and dropped outside the runtime.
    let assistant = bootstrap::build(&config, &data_dir)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ie-assistant")
        .build()
        .context("cannot start tokio runtime")?;

    println!("IE Assistant {} (log: {})", env!("CARGO_PKG_VERSION"), log_path.display());
    println!("commands: :load <file.json>, :export <path>, :quit");
    let outcome = runtime.block_on(repl(&assistant));
    drop(runtime);
    outcome
}

async fn repl(assistant: &Assistant) -> Result<()> {
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&input) {
            break;
        }

        if let Some(path) = input.strip_prefix(":load ") {
            match load_rows(Path::new(path.trim())) {
                Ok(table) => {
                    println!("attached {} rows", table.len());
                    conversation.attach_file(table);
                }
                Err(e) => println!("cannot load file: {e:#}"),
            }
            continue;
        }
        if let Some(path) = input.strip_prefix(":export ") {
            match conversation.export(Path::new(path.trim())) {
                Ok(()) => println!("exported to {}", path.trim()),
                Err(e) => println!("cannot export: {e}"),
            }
            continue;
        }

        let budget = TurnBudget::with_timeout(assistant.turn_timeout());
        let on_interrupt = budget.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        let progress = ProgressSink::from_fn(|message| println!("… {message}"));
        let result = assistant
            .respond(&mut conversation, input, progress, budget)
            .await;
        interrupt.abort();

        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

/// Read a JSON array of row objects.
fn load_rows(path: &Path) -> Result<Table> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&raw).context("parsing JSON")?;
    anyhow::ensure!(value.is_array(), "expected a JSON array of rows");
    Ok(Table::from_json(value))
}
