use async_trait::async_trait;
use tracing::info;

use crate::error::RenudgeError;
use crate::subscription::ChatTurn;

/// The external "send a proactive message" capability. Implementations
/// own the LLM call and channel delivery; the scheduler only learns
/// success or failure.
#[async_trait]
pub trait ProactiveDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        conversation_id: &str,
        text: &str,
        persona_override: Option<&str>,
        provider_override: Option<&str>,
    ) -> Result<(), RenudgeError>;
}

/// External conversation history. `None` means the backing store is
/// unavailable; callers degrade to their own cached turns.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn recent_turns(&self, conversation_id: &str, depth: usize) -> Option<Vec<ChatTurn>>;
}

/// Persona lookup: override id first, then the session persona, then the
/// default. `None` leaves the model's default system prompt in place.
pub trait PersonaResolver: Send + Sync {
    fn resolve(&self, conversation_id: &str, override_id: Option<&str>) -> Option<String>;
}

/// Default wiring for `renudge start`: outbound messages go to the log,
/// which is enough to observe the scheduler working before an integrator
/// plugs in a real channel.
pub struct LogDispatcher;

#[async_trait]
impl ProactiveDispatcher for LogDispatcher {
    async fn dispatch(
        &self,
        conversation_id: &str,
        text: &str,
        persona_override: Option<&str>,
        provider_override: Option<&str>,
    ) -> Result<(), RenudgeError> {
        info!(
            "proactive -> {conversation_id} (persona: {}, provider: {}): {text}",
            persona_override.unwrap_or("default"),
            provider_override.unwrap_or("default"),
        );
        Ok(())
    }
}

/// No external history store.
pub struct NoHistory;

#[async_trait]
impl HistoryProvider for NoHistory {
    async fn recent_turns(&self, _conversation_id: &str, _depth: usize) -> Option<Vec<ChatTurn>> {
        None
    }
}

/// No persona store: only an explicit override id resolves, verbatim.
pub struct NoPersonas;

impl PersonaResolver for NoPersonas {
    fn resolve(&self, _conversation_id: &str, override_id: Option<&str>) -> Option<String> {
        override_id.map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_dispatcher_always_succeeds() {
        let d = LogDispatcher;
        assert!(d.dispatch("chat:1", "hello", None, None).await.is_ok());
        assert!(d
            .dispatch("chat:1", "hello", Some("persona"), Some("provider"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_no_history_is_unavailable() {
        assert!(NoHistory.recent_turns("chat:1", 8).await.is_none());
    }

    #[test]
    fn test_no_personas_passes_override_through() {
        let p = NoPersonas;
        assert_eq!(p.resolve("chat:1", None), None);
        assert_eq!(p.resolve("chat:1", Some("helper")), Some("helper".into()));
    }
}
