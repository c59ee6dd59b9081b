use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{HistoryProvider, PersonaResolver, ProactiveDispatcher};
use crate::error::RenudgeError;
use crate::prompt::PromptSelector;
use crate::store::StateStore;

/// Process-wide state container. The scheduler owns the tick; inbound
/// activity and management commands mutate through the same locks, so
/// tick evaluation and writes are serialized (single mutual-exclusion
/// domain over the store, per-tick snapshot reads of the config).
pub struct AppState {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    store: Mutex<StateStore>,
    pub dispatcher: Arc<dyn ProactiveDispatcher>,
    pub history: Arc<dyn HistoryProvider>,
    pub personas: Arc<dyn PersonaResolver>,
    pub prompts: Arc<dyn PromptSelector>,
}

impl AppState {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        dispatcher: Arc<dyn ProactiveDispatcher>,
        history: Arc<dyn HistoryProvider>,
        personas: Arc<dyn PersonaResolver>,
        prompts: Arc<dyn PromptSelector>,
    ) -> Self {
        let store = StateStore::load(config.data_root_dir());
        AppState {
            config: RwLock::new(config),
            config_path,
            store: Mutex::new(store),
            dispatcher,
            history,
            personas,
            prompts,
        }
    }

    /// One atomic read of the config; the tick works off this snapshot so
    /// a mid-tick mutation cannot half-apply.
    pub fn snapshot_config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Apply a mutation, re-normalize, and save the YAML back when the
    /// config came from a file. Returns the new snapshot.
    pub fn update_config(
        &self,
        mutate: impl FnOnce(&mut Config),
    ) -> Result<Config, RenudgeError> {
        let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
        mutate(&mut config);
        config.normalize();
        if let Some(path) = &self.config_path {
            config.save_yaml(path)?;
        }
        Ok(config.clone())
    }

    pub fn store(&self) -> MutexGuard<'_, StateStore> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Inbound-activity hook for the surrounding chat runtime: refreshes
    /// the conversation's timestamps and (mode permitting) subscription,
    /// then flushes.
    pub fn note_user_message(&self, conversation_id: &str, content: &str) {
        let mode = self.snapshot_config().subscribe_mode;
        let mut store = self.store();
        store
            .session_mut(conversation_id)
            .note_user_message(Utc::now(), mode, content);
        if let Err(e) = store.flush() {
            warn!("State flush failed after inbound message: {e}");
        }
    }
}

/// Run the scheduler until Ctrl-C, then stop it cleanly and flush.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = crate::scheduler::spawn_scheduler(state.clone(), shutdown_rx);

    info!("Runtime active; waiting for Ctrl-C");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow!("Failed to listen for Ctrl-C: {e}"))?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;

    if let Err(e) = state.store().flush() {
        warn!("Final state flush failed: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscribeMode;
    use crate::dispatch::{LogDispatcher, NoHistory, NoPersonas};
    use crate::prompt::UniformSelector;

    fn test_state(config: Config) -> AppState {
        AppState::new(
            config,
            None,
            Arc::new(LogDispatcher),
            Arc::new(NoHistory),
            Arc::new(NoPersonas),
            Arc::new(UniformSelector),
        )
    }

    #[test]
    fn test_note_user_message_auto_subscribes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        config.subscribe_mode = SubscribeMode::Auto;
        let state = test_state(config);

        state.note_user_message("chat:1", "hello");
        let store = state.store();
        let sub = store.session("chat:1").unwrap();
        assert!(sub.subscribed);
        assert_eq!(sub.history.len(), 1);
    }

    #[test]
    fn test_note_user_message_manual_tracks_without_subscribing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        let state = test_state(config);

        state.note_user_message("chat:1", "hello");
        let store = state.store();
        let sub = store.session("chat:1").unwrap();
        assert!(!sub.subscribed);
        assert!(sub.last_user_reply_at.is_some());
    }

    #[test]
    fn test_update_config_renormalizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        let state = test_state(config);

        let updated = state
            .update_config(|c| {
                c.daily_time1 = "09:00".into();
                c.daily_time2 = "09:00".into();
            })
            .unwrap();
        assert_eq!(updated.daily_time2, "09:01");
        assert_eq!(state.snapshot_config().daily_time2, "09:01");
    }

    #[test]
    fn test_update_config_saves_yaml_when_path_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renudge.config.yaml");
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        let state = AppState::new(
            config,
            Some(path.clone()),
            Arc::new(LogDispatcher),
            Arc::new(NoHistory),
            Arc::new(NoPersonas),
            Arc::new(UniformSelector),
        );

        state.update_config(|c| c.after_last_msg_minutes = 45).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("after_last_msg_minutes: 45"));
    }
}
