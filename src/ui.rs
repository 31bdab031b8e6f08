use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::config::UIConfig;
use crate::event_bus::{Event, EventBus};
use crate::parser::GiftSuggestion;
use crate::session::SuggestionBatch;

const CARD_WIDTH: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Terminal,
    Plain,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminal" => Ok(OutputFormat::Terminal),
            "plain" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            other => Err(anyhow!("Unknown output format '{}' (expected terminal, plain or json)", other)),
        }
    }
}

/// Terminal front-end: a spinner while the model works, then the results.
pub struct TerminalUI {
    format: OutputFormat,
    spinner_style: Option<ProgressStyle>,
}

impl TerminalUI {
    pub fn new(config: &UIConfig) -> Result<Self> {
        let format = config.output_format.parse()?;
        if !config.colorful || format != OutputFormat::Terminal {
            colored::control::set_override(false);
        }

        let spinner_style = if config.progress_bars && format == OutputFormat::Terminal {
            Some(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .context("Invalid spinner template")?,
            )
        } else {
            None
        };

        Ok(Self { format, spinner_style })
    }

    /// Show a spinner that follows request events on `bus` until the
    /// request completes or fails.
    pub fn start_request(&self, bus: &Arc<EventBus>) -> Option<ProgressBar> {
        let style = self.spinner_style.clone()?;
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message("Thinking about gifts...");

        let mut receiver = bus.subscribe();
        let handle = spinner.clone();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv().await {
                let done = matches!(
                    event,
                    Event::RequestCompleted { .. } | Event::RequestFailed { .. }
                );
                Self::handle_event(event, &handle);
                if done || handle.is_finished() {
                    break;
                }
            }
        });
        Some(spinner)
    }

    pub fn finish_request(&self, spinner: Option<ProgressBar>) {
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
    }

    fn handle_event(event: Event, spinner: &ProgressBar) {
        match event {
            Event::RequestStarted { source, .. } => {
                spinner.set_message(format!("🎁 Finding gift ideas from {}", source));
            }
            Event::APICallStarted { provider, model } => {
                spinner.set_message(format!("🤖 Asking {} ({})", provider.bright_cyan(), model));
            }
            Event::RequestRetrying { attempt, error, .. } => {
                spinner.set_message(format!("🔁 Retry {} after: {}", attempt, error.bright_yellow()));
            }
            Event::RequestCompleted { suggestions, .. } => {
                spinner.set_message(format!("✅ {} ideas", suggestions));
            }
            Event::RequestFailed { message, .. } => {
                spinner.set_message(format!("❌ {}", message.bright_red()));
            }
            _ => {}
        }
    }

    pub fn render_suggestions(&self, batch: &SuggestionBatch) -> Result<String> {
        info!("Rendering {} suggestions as {:?}", batch.suggestions.len(), self.format);
        match self.format {
            OutputFormat::Terminal => Ok(render_cards(&batch.suggestions)),
            OutputFormat::Plain => Ok(render_plain(&batch.suggestions)),
            OutputFormat::Json => {
                serde_json::to_string_pretty(batch).context("Failed to serialize suggestions")
            }
        }
    }

    pub fn render_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({ "error": message }).to_string(),
            _ => format!("{} {}", "✗".red().bold(), message.white()),
        }
    }
}

/// One bordered card per suggestion.
pub fn render_cards(suggestions: &[GiftSuggestion]) -> String {
    let mut out = String::new();
    let rule = "─".repeat(CARD_WIDTH);

    for (i, gift) in suggestions.iter().enumerate() {
        out.push_str(&format!("{}\n", rule.bright_blue()));
        out.push_str(&format!(
            "{} {}  {}\n",
            format!("{}.", i + 1).bright_white().bold(),
            gift.name.bright_white().bold(),
            gift.price.bright_green()
        ));
        out.push_str(&format!(
            "   {} · {}\n",
            gift.category.bright_magenta(),
            gift.occasion.bright_cyan()
        ));
        for line in textwrap::wrap(&gift.description, CARD_WIDTH - 3) {
            out.push_str(&format!("   {}\n", line));
        }
    }
    if !suggestions.is_empty() {
        out.push_str(&format!("{}\n", rule.bright_blue()));
    }
    out
}

/// Same fields as the model template, one record per paragraph.
pub fn render_plain(suggestions: &[GiftSuggestion]) -> String {
    suggestions
        .iter()
        .enumerate()
        .map(|(i, gift)| {
            format!(
                "GIFT {}:\nNAME: {}\nPRICE: {}\nDESCRIPTION: {}\nOCCASION: {}\nCATEGORY: {}\n",
                i + 1,
                gift.name,
                gift.price,
                gift.description,
                gift.occasion,
                gift.category
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
