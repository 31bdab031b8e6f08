use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::RequestConfig;
use crate::error::{ErrorKind, SuggestError};
use crate::event_bus::{Event, EventBus, EventEmitter};
use crate::image::ImageAttachment;
use crate::impl_event_emitter;
use crate::llm_manager::LLMManager;
use crate::parser::{GiftSuggestion, parse_suggestions};
use crate::prompt::{GiftRequest, Prompt, PromptBuilder, PromptSource};

/// Generation number tagging each submitted request.
pub type RequestId = u64;

/// Where a session stands with respect to its latest request.
#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionState {
    Idle,
    Loading(RequestId),
    Success(Vec<GiftSuggestion>),
    Failure(ErrorKind, String),
}

/// Result of one `submit` call, whether or not it reached the session state.
#[derive(Debug, Clone)]
pub struct Submission {
    pub request_id: RequestId,
    pub source: PromptSource,
    pub result: Result<Vec<GiftSuggestion>, SuggestError>,
    /// False when a newer request or a reset superseded this one.
    pub applied: bool,
}

/// JSON envelope for a successful request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionBatch {
    pub request_id: RequestId,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub source: PromptSource,
    pub suggestions: Vec<GiftSuggestion>,
}

impl SuggestionBatch {
    pub fn new(request_id: RequestId, source: PromptSource, suggestions: Vec<GiftSuggestion>) -> Self {
        Self {
            request_id,
            generated_at: chrono::Utc::now(),
            source,
            suggestions,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&RequestConfig::default())
    }
}

/// Holds the request context and drives requests through
/// `Idle -> Loading -> Success | Failure`, ignoring completions from
/// requests that have since been superseded.
pub struct SuggestionSession {
    llm_manager: LLMManager,
    prompt_builder: PromptBuilder,
    options: SessionOptions,
    context: RwLock<GiftRequest>,
    state: RwLock<SuggestionState>,
    // Only modified while `state` is write-locked.
    generation: AtomicU64,
    event_bus: Option<Arc<EventBus>>,
}

impl SuggestionSession {
    pub fn new(llm_manager: LLMManager, options: SessionOptions) -> Self {
        Self {
            llm_manager,
            prompt_builder: PromptBuilder::new(),
            options,
            context: RwLock::new(GiftRequest::default()),
            state: RwLock::new(SuggestionState::Idle),
            generation: AtomicU64::new(0),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub async fn set_occasion(&self, occasion: impl Into<String>) {
        self.context.write().await.occasion = occasion.into();
    }

    pub async fn set_recipient(&self, recipient: impl Into<String>) {
        self.context.write().await.recipient = recipient.into();
    }

    pub async fn set_budget(&self, budget: impl Into<String>) {
        self.context.write().await.budget = budget.into();
    }

    pub async fn set_image(&self, image: Option<ImageAttachment>) {
        self.context.write().await.image = image;
    }

    pub async fn context(&self) -> GiftRequest {
        self.context.read().await.clone()
    }

    pub async fn state(&self) -> SuggestionState {
        self.state.read().await.clone()
    }

    pub fn current_request(&self) -> RequestId {
        self.generation.load(Ordering::SeqCst)
    }

    /// Clear the context and results. Any request still in flight becomes stale.
    pub async fn reset(&self) {
        {
            let mut state = self.state.write().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = SuggestionState::Idle;
        }
        *self.context.write().await = GiftRequest::default();
        let _ = self.emit_event(Event::SessionReset).await;
        debug!("Session reset");
    }

    /// Ask the model for suggestions using the current context.
    pub async fn submit(&self) -> Submission {
        let request_id = self.begin().await;
        let request = self.context().await;
        let source = request.source();

        info!("Request {} started ({:?})", request_id, source);
        let _ = self
            .emit_event(Event::RequestStarted {
                request_id,
                source: format!("{:?}", source).to_lowercase(),
            })
            .await;

        let prompt = self.prompt_builder.build(&request);
        let result = self.run_with_retries(request_id, &prompt).await;
        let applied = self.complete(request_id, &result).await;

        Submission {
            request_id,
            source,
            result,
            applied,
        }
    }

    async fn begin(&self) -> RequestId {
        let mut state = self.state.write().await;
        let request_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *state = SuggestionState::Loading(request_id);
        request_id
    }

    async fn run_with_retries(
        &self,
        request_id: RequestId,
        prompt: &Prompt,
    ) -> Result<Vec<GiftSuggestion>, SuggestError> {
        let mut attempt = 0;
        loop {
            match self.attempt(prompt).await {
                Err(e)
                    if e.is_transient()
                        && attempt < self.options.max_retries
                        && self.current_request() == request_id =>
                {
                    attempt += 1;
                    warn!(
                        "Request {} failed ({}), retrying ({}/{})",
                        request_id, e.kind, attempt, self.options.max_retries
                    );
                    let _ = self
                        .emit_event(Event::RequestRetrying {
                            request_id,
                            attempt,
                            error: e.message.clone(),
                        })
                        .await;
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt(&self, prompt: &Prompt) -> Result<Vec<GiftSuggestion>, SuggestError> {
        let reply = match tokio::time::timeout(
            self.options.timeout,
            self.llm_manager.send_prompt(prompt),
        )
        .await
        {
            Err(_) => return Err(SuggestError::timeout()),
            Ok(Err(e)) => {
                warn!("{} call failed: {}", self.llm_manager.provider().name(), e);
                return Err(e.into());
            }
            Ok(Ok(reply)) => reply,
        };

        if reply.trim().is_empty() {
            return Err(SuggestError::no_response());
        }

        let suggestions = parse_suggestions(&reply);
        if suggestions.is_empty() {
            debug!("Unparseable reply: {}", reply);
            return Err(SuggestError::no_suggestions(prompt.source() == PromptSource::Image));
        }
        Ok(suggestions)
    }

    /// Apply `result` if `request_id` is still current. Returns whether it was.
    async fn complete(
        &self,
        request_id: RequestId,
        result: &Result<Vec<GiftSuggestion>, SuggestError>,
    ) -> bool {
        {
            let mut state = self.state.write().await;
            let current_id = self.generation.load(Ordering::SeqCst);
            if current_id != request_id {
                drop(state);
                warn!(
                    "Discarding stale response for request {} (current is {})",
                    request_id, current_id
                );
                let _ = self
                    .emit_event(Event::StaleResponseDiscarded {
                        request_id,
                        current_id,
                    })
                    .await;
                return false;
            }
            *state = match result {
                Ok(suggestions) => SuggestionState::Success(suggestions.clone()),
                Err(e) => SuggestionState::Failure(e.kind, e.message.clone()),
            };
        }

        let event = match result {
            Ok(suggestions) => {
                info!("Request {} produced {} suggestions", request_id, suggestions.len());
                Event::RequestCompleted {
                    request_id,
                    suggestions: suggestions.len(),
                }
            }
            Err(e) => {
                warn!("Request {} failed: {}", request_id, e);
                Event::RequestFailed {
                    request_id,
                    kind: e.kind,
                    message: e.message.clone(),
                }
            }
        };
        let _ = self.emit_event(event).await;
        true
    }
}

impl_event_emitter!(SuggestionSession);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm_manager::LLMProvider;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Replies with `reply` after an optional delay; prompts mentioning
    /// "Occasion: slow" take `slow_delay` instead.
    struct ScriptedProvider {
        reply: String,
        delay: Duration,
        slow_delay: Duration,
        failures_before_success: usize,
        calls: Arc<AtomicUsize>,
        last_prompt: Arc<Mutex<Option<String>>>,
    }

    impl ScriptedProvider {
        fn replying(reply: impl Into<String>) -> Self {
            Self {
                reply: reply.into(),
                delay: Duration::ZERO,
                slow_delay: Duration::ZERO,
                failures_before_success: 0,
                calls: Arc::new(AtomicUsize::new(0)),
                last_prompt: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send_prompt(&self, prompt: &Prompt) -> Result<String, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.text.clone());

            let delay = if prompt.text.contains("Occasion: slow") {
                self.slow_delay
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;

            if call < self.failures_before_success {
                return Err(ProviderError::Network("connection reset".to_string()));
            }
            if prompt.text.contains("Occasion: slow") {
                return Ok(gift_reply(&["Stale Gift"]));
            }
            Ok(self.reply.clone())
        }
    }

    fn gift_reply(names: &[&str]) -> String {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    "GIFT {}:\nNAME: {}\nPRICE: $10-$20\nDESCRIPTION: About {}.\nOCCASION: Birthday\nCATEGORY: Misc\n\n",
                    i + 1,
                    name,
                    name
                )
            })
            .collect()
    }

    fn session_with(provider: ScriptedProvider, options: SessionOptions) -> SuggestionSession {
        SuggestionSession::new(LLMManager::new(Box::new(provider)), options)
    }

    fn quick_options() -> SessionOptions {
        SessionOptions {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let session = session_with(ScriptedProvider::replying(""), quick_options());
        assert_eq!(session.state().await, SuggestionState::Idle);
        assert_eq!(session.current_request(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_birthday() {
        let names = ["Trail Daypack", "Hammock", "Headlamp", "Trail Guide", "Water Filter", "Hiking Socks"];
        let provider = ScriptedProvider::replying(gift_reply(&names));
        let last_prompt = provider.last_prompt.clone();
        let session = session_with(provider, quick_options());

        session.set_occasion("Birthday").await;
        session.set_recipient("28yo sister, loves hiking").await;
        session.set_budget("$30-$60").await;
        let submission = session.submit().await;

        let prompt = last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Birthday"));
        assert!(prompt.contains("28yo sister, loves hiking"));
        assert!(prompt.contains("$30-$60"));
        assert!(prompt.contains("exactly 6"));
        assert!(prompt.contains("CATEGORY:"));

        assert!(submission.applied);
        assert_eq!(submission.source, PromptSource::Text);
        let gifts = submission.result.unwrap();
        assert_eq!(gifts.len(), 6);
        for (gift, name) in gifts.iter().zip(names) {
            assert_eq!(gift.name, name);
            assert_eq!(gift.description, format!("About {}.", name));
            assert_eq!(gift.price, "$10-$20");
        }
        assert!(matches!(session.state().await, SuggestionState::Success(ref g) if g.len() == 6));
    }

    #[tokio::test]
    async fn test_empty_reply_is_no_response() {
        let session = session_with(ScriptedProvider::replying("   \n"), quick_options());
        session.submit().await;
        assert_eq!(
            session.state().await,
            SuggestionState::Failure(
                ErrorKind::NoResponse,
                "No response received. Please try again.".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_no_suggestions() {
        let session = session_with(
            ScriptedProvider::replying("I'm not sure what to suggest."),
            quick_options(),
        );
        session.submit().await;
        assert!(matches!(
            session.state().await,
            SuggestionState::Failure(ErrorKind::NoSuggestions, ref m) if m == "Unable to generate suggestions. Please try again."
        ));

        session
            .set_image(Some(ImageAttachment::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")))
            .await;
        let submission = session.submit().await;
        assert_eq!(submission.source, PromptSource::Image);
        assert_eq!(
            submission.result.unwrap_err().message,
            "Unable to generate suggestions from image. Please try again."
        );
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Late"]));
        provider.delay = Duration::from_millis(500);
        let options = SessionOptions {
            timeout: Duration::from_millis(50),
            ..quick_options()
        };
        let session = session_with(provider, options);

        let submission = session.submit().await;
        assert_eq!(submission.result.unwrap_err().kind, ErrorKind::Timeout);
        assert!(matches!(
            session.state().await,
            SuggestionState::Failure(ErrorKind::Timeout, _)
        ));
    }

    #[tokio::test]
    async fn test_connectivity_failures_are_retried() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Mug"]));
        provider.failures_before_success = 2;
        let calls = provider.calls.clone();
        let options = SessionOptions {
            max_retries: 2,
            ..quick_options()
        };
        let session = session_with(provider, options);

        let submission = session.submit().await;
        assert_eq!(submission.result.unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retries_by_default() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Mug"]));
        provider.failures_before_success = 1;
        let calls = provider.calls.clone();
        let session = session_with(provider, quick_options());

        session.submit().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.state().await,
            SuggestionState::Failure(ErrorKind::Connectivity, ref m) if m == "Network Error: Please check your internet connection"
        ));
    }

    #[tokio::test]
    async fn test_stale_response_does_not_overwrite_newer_state() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Fresh Gift"]));
        provider.slow_delay = Duration::from_millis(300);
        let bus = Arc::new(EventBus::new(32));
        let session = Arc::new(session_with(provider, quick_options()).with_event_bus(bus.clone()));

        session.set_occasion("slow").await;
        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.submit().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state().await, SuggestionState::Loading(1));

        session.set_occasion("Birthday").await;
        let fresh = session.submit().await;
        assert!(fresh.applied);
        assert_eq!(fresh.request_id, 2);

        let stale = slow.await.unwrap();
        assert!(!stale.applied);
        assert_eq!(stale.request_id, 1);
        assert_eq!(stale.result.unwrap()[0].name, "Stale Gift");

        match session.state().await {
            SuggestionState::Success(gifts) => assert_eq!(gifts[0].name, "Fresh Gift"),
            other => panic!("Unexpected state: {:?}", other),
        }
        assert_eq!(bus.get_metrics().await.stale_responses, 1);
    }

    #[tokio::test]
    async fn test_reset_during_flight_stays_idle() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Mug"]));
        provider.delay = Duration::from_millis(200);
        let session = Arc::new(session_with(provider, quick_options()));

        session.set_occasion("Wedding").await;
        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.submit().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.reset().await;

        let submission = pending.await.unwrap();
        assert!(!submission.applied);
        assert_eq!(session.state().await, SuggestionState::Idle);
        assert_eq!(session.context().await, GiftRequest::default());
    }

    #[tokio::test]
    async fn test_new_request_clears_previous_failure() {
        let mut provider = ScriptedProvider::replying(gift_reply(&["Mug"]));
        provider.failures_before_success = 1;
        let session = session_with(provider, quick_options());

        session.submit().await;
        assert!(matches!(session.state().await, SuggestionState::Failure(..)));

        session.submit().await;
        assert!(matches!(session.state().await, SuggestionState::Success(_)));
    }
}
