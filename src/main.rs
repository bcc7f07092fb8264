//! # Business Assistant CLI (`bia`)
//!
//! ## Usage
//!
//! ```bash
//! bia --config ./config/bia.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bia ask "<query>"` | Answer a single query |
//! | `bia chat` | Interactive session with conversation memory |
//! | `bia retrieve "<query>"` | Show the passages retrieval would use |
//! | `bia tools` | List registered tools |
//! | `bia serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! bia ask "What is 15% of 200?"
//! bia ask "What is our refund policy?" --json
//! bia retrieve "refund window" --k 5
//! LOG_LEVEL=debug bia chat
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use business_assistant::assistant::{Answer, Assistant};
use business_assistant::config::{self, Config, Credentials};
use business_assistant::{logging, server};

/// Business Assistant CLI: answer business questions from a knowledge base
/// and live tool data.
///
/// Credentials are read from `OPENAI_API_KEY`, `WEATHER_API_KEY` and
/// `HUBSPOT_ACCESS_TOKEN`. See `config/bia.example.toml` for settings.
#[derive(Parser)]
#[command(
    name = "bia",
    about = "Business Assistant: retrieval plus tool calls plus grounded synthesis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bia.toml`. When the default file is absent,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/bia.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single query.
    Ask {
        query: String,

        /// Print the full answer record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interactive session.
    ///
    /// `/history` shows the retained turns, `/clear` resets the
    /// conversation and `/quit` exits.
    Chat,

    /// Run retrieval only and print the scored passages.
    Retrieve {
        query: String,

        /// Number of passages (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// List registered tools and their parameters.
    Tools,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let cfg = load(&cli.config)?;
    let creds = Credentials::from_env();
    let assistant = Assistant::from_config(&cfg, &creds).await?;

    match cli.command {
        Commands::Ask { query, json } => {
            let mut session = assistant.new_session();
            let answer = assistant.answer(&query, &mut session).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Chat => run_chat(&assistant).await?,
        Commands::Retrieve { query, k } => {
            let k = k.unwrap_or(assistant.top_k());
            let result = assistant.retriever().retrieve(&query, k).await;
            if result.is_empty() {
                println!("No passages found.");
            }
            for (i, hit) in result.hits.iter().enumerate() {
                let snippet: String = hit.chunk.text.chars().take(200).collect();
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    i + 1,
                    hit.score,
                    hit.chunk.document_id,
                    hit.chunk.chunk_index
                );
                println!("    {}", snippet.replace('\n', " "));
            }
        }
        Commands::Tools => {
            let registry = assistant.registry();
            println!("{} tool(s) registered:\n", registry.len());
            for d in registry.descriptors() {
                let flag = if d.mutating { " (mutating)" } else { "" };
                println!("  {} [{}]{}", d.name, d.category, flag);
                println!("    {}", d.description);
                if let Some(props) = d.parameters.get("properties").and_then(|p| p.as_object()) {
                    let names: Vec<&str> = props.keys().map(String::as_str).collect();
                    if !names.is_empty() {
                        println!("    params: {}", names.join(", "));
                    }
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg.server.bind, Arc::new(assistant)).await?;
        }
    }

    Ok(())
}

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new("./config/bia.toml") {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        let cfg = Config::default();
        config::validate(&cfg)?;
        return Ok(cfg);
    }
    config::load_config(path)
}

fn print_answer(answer: &Answer) {
    println!("{}\n", answer.response);
    if !answer.tools_used.is_empty() {
        println!("tools:   {}", answer.tools_used.join(", "));
    }
    if !answer.sources.is_empty() {
        println!("sources: {}", answer.sources.join(", "));
    }
    println!("latency: {} ms", answer.latency_ms);
}

async fn run_chat(assistant: &Assistant) -> Result<()> {
    let mut session = assistant.new_session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Business Assistant. Type /history, /clear or /quit.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                session.reset();
                println!("Conversation cleared.");
            }
            "/history" => {
                if session.is_empty() {
                    println!("(no turns yet)");
                }
                for turn in session.turns() {
                    println!("[{}] you: {}", turn.timestamp.format("%H:%M:%S"), turn.query);
                    println!("    assistant: {}", turn.response.replace('\n', " "));
                }
            }
            query => match assistant.answer(query, &mut session).await {
                Ok(answer) => {
                    println!();
                    print_answer(&answer);
                    println!();
                }
                Err(e) => eprintln!("Error: {}", e),
            },
        }
    }
    Ok(())
}
