use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::error::ErrorKind;

/// Events that can be emitted by components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Request lifecycle events
    RequestStarted {
        request_id: u64,
        source: String,
    },
    RequestRetrying {
        request_id: u64,
        attempt: u32,
        error: String,
    },
    RequestCompleted {
        request_id: u64,
        suggestions: usize,
    },
    RequestFailed {
        request_id: u64,
        kind: ErrorKind,
        message: String,
    },
    StaleResponseDiscarded {
        request_id: u64,
        current_id: u64,
    },
    SessionReset,

    // API events
    APICallStarted {
        provider: String,
        model: String,
    },
    APICallCompleted {
        provider: String,
        tokens: usize,
    },
    APIError {
        provider: String,
        error: String,
    },
}

/// Event bus for component communication
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    metrics: Arc<RwLock<Metrics>>,
}

/// Accumulated metrics from events
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub total_api_calls: usize,
    pub total_tokens: usize,
    pub api_errors: usize,
    pub requests_started: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub stale_responses: usize,
    pub suggestions_received: usize,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            metrics: Arc::new(RwLock::new(Metrics::default())),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub async fn emit(&self, event: Event) -> Result<()> {
        self.update_metrics(&event).await;

        // No receivers is fine
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Get current metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.read().await.clone()
    }

    async fn update_metrics(&self, event: &Event) {
        let mut metrics = self.metrics.write().await;

        match event {
            Event::APICallCompleted { tokens, .. } => {
                metrics.total_api_calls += 1;
                metrics.total_tokens += tokens;
            }
            Event::APIError { .. } => {
                metrics.total_api_calls += 1;
                metrics.api_errors += 1;
            }
            Event::RequestStarted { .. } => {
                metrics.requests_started += 1;
            }
            Event::RequestCompleted { suggestions, .. } => {
                metrics.requests_succeeded += 1;
                metrics.suggestions_received += suggestions;
            }
            Event::RequestFailed { .. } => {
                metrics.requests_failed += 1;
            }
            Event::StaleResponseDiscarded { .. } => {
                metrics.stale_responses += 1;
            }
            _ => {}
        }
    }
}

/// Trait for components that can emit events
#[async_trait::async_trait]
pub trait EventEmitter {
    #[allow(dead_code)]
    fn set_event_bus(&mut self, bus: Arc<EventBus>);

    async fn emit_event(&self, event: Event) -> Result<()>;
}

/// Helper macro to implement EventEmitter trait
#[macro_export]
macro_rules! impl_event_emitter {
    ($type:ty) => {
        #[async_trait::async_trait]
        impl EventEmitter for $type {
            fn set_event_bus(&mut self, bus: Arc<EventBus>) {
                self.event_bus = Some(bus);
            }

            async fn emit_event(&self, event: Event) -> anyhow::Result<()> {
                if let Some(bus) = &self.event_bus {
                    bus.emit(event).await
                } else {
                    Ok(())
                }
            }
        }
    };
}
