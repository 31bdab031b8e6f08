use crate::error::ProviderError;
use crate::event_bus::{Event, EventBus, EventEmitter};
use crate::impl_event_emitter;
use crate::prompt::{Prompt, SUGGESTION_COUNT};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// Trait representing an LLM provider.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Name of the provider.
    fn name(&self) -> &str;

    /// Send a prompt to the provider and return the reply text.
    /// An empty string means the model produced no text.
    async fn send_prompt(&self, prompt: &Prompt) -> Result<String, ProviderError>;

    /// Model name of the provider.
    fn model_name(&self) -> &str {
        "Unknown"
    }
}

/// Canned provider used in offline mode.
pub struct LocalProvider;

const LOCAL_CATALOGUE: [(&str, &str, &str, &str); SUGGESTION_COUNT] = [
    ("Personalized Photo Book", "$30-$50", "A printed book of shared memories. Easy to make online and lasts for years.", "Keepsakes"),
    ("Insulated Travel Mug", "$20-$35", "Keeps drinks hot on the go. A daily reminder of you.", "Home & Kitchen"),
    ("Cozy Throw Blanket", "$25-$60", "Soft, warm and useful in every season.", "Home"),
    ("Experience Voucher", "$40-$100", "A class, tasting or outing chosen to match their interests.", "Experiences"),
    ("Wireless Earbuds", "$50-$120", "Compact audio for commutes and workouts.", "Electronics"),
    ("Bestselling Novel", "$15-$25", "A well-reviewed book in a genre they enjoy.", "Books"),
];

#[async_trait]
impl LLMProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn send_prompt(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let occasion = prompt
            .text
            .lines()
            .find_map(|line| line.strip_prefix("Occasion:"))
            .map(str::trim)
            .unwrap_or("Any occasion");

        let reply = LOCAL_CATALOGUE
            .iter()
            .enumerate()
            .map(|(i, (name, price, description, category))| {
                format!(
                    "GIFT {}:\nNAME: {}\nPRICE: {}\nDESCRIPTION: {}\nOCCASION: {}\nCATEGORY: {}\n",
                    i + 1,
                    name,
                    price,
                    description,
                    occasion,
                    category
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

/// Owns the active provider and reports each call on the event bus.
pub struct LLMManager {
    provider: Box<dyn LLMProvider>,
    event_bus: Option<Arc<EventBus>>,
}

impl LLMManager {
    pub fn new(provider: Box<dyn LLMProvider>) -> Self {
        Self {
            provider,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Get the active provider.
    pub fn provider(&self) -> &dyn LLMProvider {
        &*self.provider
    }

    /// Send a prompt to the active provider.
    pub async fn send_prompt(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let provider = &self.provider;

        let _ = self
            .emit_event(Event::APICallStarted {
                provider: provider.name().to_string(),
                model: provider.model_name().to_string(),
            })
            .await;

        let result = provider.send_prompt(prompt).await;

        match &result {
            Ok(response) => {
                // Rough estimate: 1 token ≈ 4 characters
                let tokens = prompt.text.len() / 4 + response.len() / 4;
                debug!("{} replied with {} chars", provider.name(), response.len());
                let _ = self
                    .emit_event(Event::APICallCompleted {
                        provider: provider.name().to_string(),
                        tokens,
                    })
                    .await;
            }
            Err(e) => {
                let _ = self
                    .emit_event(Event::APIError {
                        provider: provider.name().to_string(),
                        error: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }
}

// Implement EventEmitter trait for LLMManager
impl_event_emitter!(LLMManager);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_suggestions;
    use crate::prompt::{GiftRequest, PromptBuilder};

    struct FailingProvider;

    #[async_trait]
    impl LLMProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send_prompt(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
            Err(ProviderError::Network("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_local_provider_reply_parses() {
        let prompt = PromptBuilder::new().build(&GiftRequest::new("Anniversary", "", ""));
        let reply = LocalProvider.send_prompt(&prompt).await.unwrap();
        let gifts = parse_suggestions(&reply);

        assert_eq!(gifts.len(), SUGGESTION_COUNT);
        assert!(gifts.iter().all(|g| g.occasion == "Anniversary"));
    }

    #[tokio::test]
    async fn test_manager_emits_api_events() {
        let bus = Arc::new(EventBus::new(16));
        let manager = LLMManager::new(Box::new(LocalProvider)).with_event_bus(bus.clone());

        manager.send_prompt(&Prompt::text("Occasion: Birthday")).await.unwrap();

        let metrics = bus.get_metrics().await;
        assert_eq!(metrics.total_api_calls, 1);
        assert!(metrics.total_tokens > 0);
        assert_eq!(metrics.api_errors, 0);
    }

    #[tokio::test]
    async fn test_manager_reports_errors() {
        let bus = Arc::new(EventBus::new(16));
        let mut receiver = bus.subscribe();
        let manager = LLMManager::new(Box::new(FailingProvider)).with_event_bus(bus.clone());

        assert!(manager.send_prompt(&Prompt::text("hi")).await.is_err());

        assert!(matches!(receiver.recv().await.unwrap(), Event::APICallStarted { .. }));
        match receiver.recv().await.unwrap() {
            Event::APIError { provider, error } => {
                assert_eq!(provider, "failing");
                assert!(error.contains("connection reset"));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
        assert_eq!(bus.get_metrics().await.api_errors, 1);
    }
}
