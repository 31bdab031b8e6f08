use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

mod config;
mod error;
mod event_bus;
mod image;
mod llm_manager;
mod logger;
mod parser;
mod prompt;
mod providers;
mod session;
mod ui;

use config::Config;
use event_bus::EventBus;
use image::ImageAttachment;
use llm_manager::{LLMManager, LLMProvider, LocalProvider};
use providers::GeminiProvider;
use session::{SessionOptions, Submission, SuggestionBatch, SuggestionSession, SuggestionState};
use ui::TerminalUI;

#[derive(Parser)]
#[command(name = "gift_suggester", about = "Ask a language model for gift ideas")]
struct Args {
    /// Occasion, e.g. "Birthday"
    #[arg(short, long, default_value = "")]
    occasion: String,
    /// Who the gift is for and what they like
    #[arg(short, long, default_value = "")]
    recipient: String,
    /// Budget, e.g. "$30-$60"
    #[arg(short, long, default_value = "")]
    budget: String,
    /// Photo to base the suggestions on
    #[arg(short, long)]
    image: Option<String>,
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,
    /// Model to use instead of the configured one
    #[arg(long)]
    model: Option<String>,
    /// Output format: terminal, plain or json
    #[arg(long)]
    format: Option<String>,
    /// Use canned suggestions instead of calling the API
    #[arg(long)]
    offline: bool,
    /// Prompt for the details and allow several searches
    #[arg(long)]
    interactive: bool,
    /// Write the default configuration to this path and exit
    #[arg(long)]
    write_config: Option<String>,
    /// Run without spinner or colours
    #[arg(long)]
    headless: bool,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logger::init(args.verbose);
    dotenv::dotenv().ok();

    if let Some(path) = &args.write_config {
        Config::default().save(path)?;
        println!("Wrote default configuration to {}", path);
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(&args.config)?;
    config.merge_with_args(args.headless, args.model.as_deref(), args.format.as_deref());

    let event_bus = Arc::new(EventBus::new(100));
    let ui = TerminalUI::new(&config.ui)?;

    let provider = build_provider(&config, args.offline)?;
    info!("Using {} ({})", provider.name(), provider.model_name());
    let llm_manager = LLMManager::new(provider).with_event_bus(event_bus.clone());
    let session = SuggestionSession::new(llm_manager, SessionOptions::from_config(&config.request))
        .with_event_bus(event_bus.clone());

    if args.interactive {
        run_interactive(&session, &ui, &event_bus, &config).await?;
        let metrics = event_bus.get_metrics().await;
        info!(
            "Session finished: {} requests ({} ok, {} failed), {} suggestions, {} API calls ({} errors, ~{} tokens), {} stale responses",
            metrics.requests_started,
            metrics.requests_succeeded,
            metrics.requests_failed,
            metrics.suggestions_received,
            metrics.total_api_calls,
            metrics.api_errors,
            metrics.total_tokens,
            metrics.stale_responses
        );
        return Ok(ExitCode::SUCCESS);
    }

    session.set_occasion(args.occasion.as_str()).await;
    session.set_recipient(args.recipient.as_str()).await;
    session.set_budget(args.budget.as_str()).await;
    if let Some(path) = &args.image {
        let image = ImageAttachment::from_file(path, config.request.max_image_bytes)?;
        session.set_image(Some(image)).await;
    }

    let submission = submit(&session, &ui, &event_bus).await;
    report(&ui, submission)?;
    match session.state().await {
        SuggestionState::Success(_) => Ok(ExitCode::SUCCESS),
        _ => Ok(ExitCode::FAILURE),
    }
}

fn build_provider(config: &Config, offline: bool) -> Result<Box<dyn LLMProvider>> {
    let gemini = config.gemini();
    if offline || !gemini.enabled {
        info!("Gemini disabled, using canned suggestions");
        return Ok(Box::new(LocalProvider));
    }
    let provider = GeminiProvider::new(&gemini, Duration::from_secs(config.request.timeout_secs))
        .context("Failed to set up Gemini (use --offline to run without it)")?;
    Ok(Box::new(provider))
}

async fn submit(session: &SuggestionSession, ui: &TerminalUI, bus: &Arc<EventBus>) -> Submission {
    let spinner = ui.start_request(bus);
    let submission = session.submit().await;
    ui.finish_request(spinner);
    submission
}

fn report(ui: &TerminalUI, submission: Submission) -> Result<()> {
    if !submission.applied {
        warn!("Request {} was superseded", submission.request_id);
    }
    match submission.result {
        Ok(suggestions) => {
            let batch = SuggestionBatch::new(submission.request_id, submission.source, suggestions);
            println!("{}", ui.render_suggestions(&batch)?);
        }
        Err(e) => {
            error!("Request {} failed: {}", submission.request_id, e.kind);
            eprintln!("{}", ui.render_error(&e.message));
        }
    }
    Ok(())
}

async fn run_interactive(
    session: &SuggestionSession,
    ui: &TerminalUI,
    bus: &Arc<EventBus>,
    config: &Config,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(occasion) = ask(&mut lines, "Occasion").await? else { break };
        session.set_occasion(occasion).await;
        let Some(recipient) = ask(&mut lines, "About the recipient").await? else { break };
        session.set_recipient(recipient).await;
        let Some(budget) = ask(&mut lines, "Budget").await? else { break };
        session.set_budget(budget).await;
        let Some(image_path) = ask(&mut lines, "Image path (optional)").await? else { break };
        if !image_path.is_empty() {
            match ImageAttachment::from_file(&image_path, config.request.max_image_bytes) {
                Ok(image) => session.set_image(Some(image)).await,
                Err(e) => {
                    eprintln!("{}", ui.render_error(&format!("{:#}", e)));
                    session.reset().await;
                    continue;
                }
            }
        }

        let submission = submit(session, ui, bus).await;
        report(ui, submission)?;

        match ask(&mut lines, "Another search? [y/N]").await? {
            Some(answer) if answer.eq_ignore_ascii_case("y") => session.reset().await,
            _ => break,
        }
    }
    Ok(())
}

/// Prompt on stderr and read one trimmed line; `None` on end of input.
async fn ask(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(format!("{}: ", label).as_bytes()).await?;
    stderr.flush().await?;
    Ok(lines
        .next_line()
        .await
        .context("Failed to read from stdin")?
        .map(|line| line.trim().to_string()))
}
