use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ragstream_core::{
    backend::BackendClient,
    classifier::ClassifiedEvent,
    config::{Config, DEFAULT_BASE_URL},
    conversation::{Conversation, Turn},
    model::TurnStatus,
    orchestrator::{ExchangeOutcome, ExchangeReport, Orchestrator},
};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "ragstream: chat with a retrieval-augmented backend", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL; overrides the config file
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer as it streams
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Interactive conversation over stdin; Ctrl-C stops the current answer
    Repl,
    /// Show backend status
    Health,
    /// List indexed documents
    Documents,
    /// Log in and print the granted role
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in as an admin and upload a document (PDF, DOCX or TXT) for indexing
    Upload {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        file: PathBuf,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::with_base_url(DEFAULT_BASE_URL),
    };
    if let Some(url) = &cli.base_url {
        cfg.backend.base_url = url.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Cancels the returned token on Ctrl-C until the guard is dropped.
struct CtrlC {
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl CtrlC {
    fn arm() -> Self {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });
        Self { token, task }
    }
}

impl Drop for CtrlC {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn print_references(turn: &Turn) {
    if !turn.citations.is_empty() {
        println!();
        println!("References:");
        for c in &turn.citations {
            println!("  - {} (p. {}, score {:.3})", c.document_name, c.page_number, c.score);
            if !c.text_snippet.is_empty() {
                println!("    \"{}\"", c.text_snippet.trim());
            }
        }
    }
}

/// Run one exchange, printing deltas live and the references once the turn closes.
async fn exchange(orch: &Orchestrator, conv: &mut Conversation, message: &str) -> ExchangeReport {
    let ctrl_c = CtrlC::arm();
    let mut printed = false;
    let mut live = |_: &Turn, event: &ClassifiedEvent| match event {
        ClassifiedEvent::TokenDelta(delta) => {
            print!("{delta}");
            io::stdout().flush().ok();
            printed |= !delta.is_empty();
        }
        ClassifiedEvent::TerminalAnswer(answer) => {
            // The answer replaces whatever streamed before it.
            if printed {
                println!();
            }
            print!("{answer}");
            io::stdout().flush().ok();
            printed = true;
        }
        ClassifiedEvent::CitationSet(_) => {}
    };
    let report = orch
        .send_observed(conv, message, ctrl_c.token.clone(), &mut live)
        .await;
    if let Some(turn) = conv.last().filter(|_| report.turn.is_some()) {
        if !printed {
            print!("{}", turn.content);
        }
        println!();
        print_references(turn);
        if let Some(err) = &report.error {
            let kept = if turn.status == TurnStatus::Errored { "" } else { " (partial answer kept)" };
            eprintln!("[error: {err}]{kept}");
        }
    }
    if report.outcome == ExchangeOutcome::Cancelled {
        eprintln!("[cancelled]");
    }
    report
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    match cli.command {
        Commands::Chat { message } => {
            let orch = Orchestrator::from_config(&cfg)?;
            let mut conv = Conversation::new();
            let report = exchange(&orch, &mut conv, &message).await;
            match report.outcome {
                ExchangeOutcome::Skipped => anyhow::bail!("message is blank"),
                ExchangeOutcome::Failed => std::process::exit(2),
                _ => {}
            }
        }
        Commands::Repl => {
            let orch = Orchestrator::from_config(&cfg)?;
            let mut conv = Conversation::from_config(&cfg.conversation);
            if let Some(greeting) = conv.last() {
                println!("{}", greeting.content);
            }
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                eprint!("> ");
                let Some(line) = lines.next_line().await? else {
                    break;
                };
                if exchange(&orch, &mut conv, &line).await.outcome != ExchangeOutcome::Skipped {
                    println!();
                }
            }
        }
        Commands::Health => {
            let status = BackendClient::from_config(&cfg)?.health().await?;
            println!(
                "status: {}, model loaded: {}",
                status.status.as_deref().unwrap_or("unknown"),
                status.model_loaded
            );
        }
        Commands::Documents => {
            let docs = BackendClient::from_config(&cfg)?.list_documents().await?;
            if docs.is_empty() {
                println!("no documents indexed");
            }
            for d in docs {
                println!("{}\t{}", d.id, d.name);
            }
        }
        Commands::Login { username, password } => {
            let session = BackendClient::from_config(&cfg)?
                .login(&username, &SecretString::from(password))
                .await?;
            println!("logged in as {username} (role: {})", session.role);
        }
        Commands::Upload {
            username,
            password,
            file,
        } => {
            let client = BackendClient::from_config(&cfg)?;
            let session = client
                .login(&username, &SecretString::from(password))
                .await?;
            if !session.is_admin() {
                anyhow::bail!("{username} has role '{}'; uploads need admin", session.role);
            }
            client.upload(&session, &file).await?;
            println!("uploaded {}", file.display());
        }
    }

    Ok(())
}
