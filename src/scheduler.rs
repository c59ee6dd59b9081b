use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::clock;
use crate::config::Config;
use crate::error::RenudgeError;
use crate::prompt::{self, PlaceholderValues};
use crate::quiet;
use crate::reminder::ReminderSchedule;
use crate::runtime::AppState;
use crate::subscription::ChatTurn;
use crate::trigger::{self, TriggerInputs, TriggerKind};

/// One planned proactive send, computed under the store lock and
/// dispatched after it is released.
struct PlannedFire {
    conversation_id: String,
    kind: TriggerKind,
    cached_turns: Vec<ChatTurn>,
}

struct ReminderFire {
    id: String,
    conversation_id: String,
    text: String,
}

pub fn spawn_scheduler(
    state: Arc<AppState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = state.snapshot_config().tick_seconds.max(5);
        info!("Scheduler started (tick: {period}s)");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(period));
        // One tick at a time: if evaluation overruns the period, the
        // overlapping tick is skipped instead of queued up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => run_tick(&state).await,
                _ = shutdown.changed() => {
                    info!("Scheduler stopped");
                    break;
                }
            }
        }
    })
}

pub async fn run_tick(state: &AppState) {
    let config = state.snapshot_config();
    let now = clock::now_in_zone(&config.timezone);
    run_tick_at(state, &config, now).await;
}

/// One tick against an explicit config snapshot and instant; split out so
/// tests can drive wall-clock scenarios deterministically.
pub async fn run_tick_at(state: &AppState, config: &Config, now: DateTime<FixedOffset>) {
    if config.enabled {
        for fire in plan_conversation_fires(state, config, now) {
            if let Err(e) = dispatch_fire(state, config, now, &fire).await {
                error!("Proactive dispatch failed for {}: {e}", fire.conversation_id);
                state
                    .store()
                    .session_mut(&fire.conversation_id)
                    .consecutive_no_reply += 1;
            }
        }

        for fire in plan_reminder_fires(state, now) {
            if let Err(e) = state
                .dispatcher
                .dispatch(&fire.conversation_id, &fire.text, None, None)
                .await
            {
                error!(
                    "Reminder {} dispatch failed for {}: {e}",
                    fire.id, fire.conversation_id
                );
            }
        }
    }

    // Batched once-per-tick persistence; a failed write stays dirty and
    // is retried next tick while memory remains authoritative.
    if let Err(e) = state.store().flush() {
        warn!("State flush failed, will retry next tick: {e}");
    }
}

/// Evaluate every tracked conversation under the store lock. Dedup tags
/// are recorded here, at plan time, so a send that later fails cannot
/// retry within the same minute bucket.
fn plan_conversation_fires(
    state: &AppState,
    config: &Config,
    now: DateTime<FixedOffset>,
) -> Vec<PlannedFire> {
    let quiet = quiet::in_quiet_hours(&config.quiet_hours, now.hour(), now.minute());
    let daily_time1 = clock::parse_hhmm(&config.daily_time1);
    let daily_time2 = clock::parse_hhmm(&config.daily_time2);

    let mut fires = Vec::new();
    let mut changed = false;
    let mut store = state.store();
    for (conversation_id, sub) in store.sessions.iter_mut() {
        if sub.expire_if_idle(now.with_timezone(&Utc), config.max_no_reply_days) {
            info!(
                "Auto-unsubscribed {conversation_id}: no user reply for {} day(s)",
                config.max_no_reply_days
            );
            changed = true;
            continue;
        }
        if !sub.subscribed {
            continue;
        }
        let firing = trigger::evaluate(&TriggerInputs {
            now,
            quiet,
            after_last_msg_minutes: config.after_last_msg_minutes,
            daily_time1,
            daily_time2,
            sub,
        });
        if let Some(firing) = firing {
            sub.last_fired_tag = Some(firing.tag);
            changed = true;
            fires.push(PlannedFire {
                conversation_id: conversation_id.clone(),
                kind: firing.kind,
                cached_turns: sub.recent_turns(config.history_depth),
            });
        }
    }
    if changed {
        store.mark_sessions_dirty();
    }
    fires
}

/// Assemble and send one proactive message. Runs without the store lock;
/// only the post-send bookkeeping re-acquires it.
async fn dispatch_fire(
    state: &AppState,
    config: &Config,
    now: DateTime<FixedOffset>,
    fire: &PlannedFire,
) -> Result<(), RenudgeError> {
    let turns = match state
        .history
        .recent_turns(&fire.conversation_id, config.history_depth)
        .await
    {
        Some(turns) if !turns.is_empty() => turns,
        _ => fire.cached_turns.clone(),
    };
    let (last_user, last_ai) = prompt::last_user_and_ai(&turns);
    let now_text = clock::format_with(&now, &config.time_format);
    let prompt_text = prompt::select_prompt(
        &config.custom_prompts,
        state.prompts.as_ref(),
        &PlaceholderValues {
            now: &now_text,
            last_user: &last_user,
            last_ai: &last_ai,
            umo: &fire.conversation_id,
        },
    );
    let persona = if !config.persona_override.is_empty() {
        Some(config.persona_override.clone())
    } else {
        state
            .personas
            .resolve(&fire.conversation_id, non_empty(&config.fixed_persona))
    };
    let text = if config.append_time_field {
        format!("[{now_text}] {prompt_text}")
    } else {
        prompt_text
    };

    state
        .dispatcher
        .dispatch(
            &fire.conversation_id,
            &text,
            persona.as_deref(),
            non_empty(&config.fixed_provider),
        )
        .await?;

    // The send itself counts as activity: the idle timer restarts.
    state
        .store()
        .session_mut(&fire.conversation_id)
        .note_proactive_sent(now.with_timezone(&Utc));
    info!("Fired {:?} trigger for {}", fire.kind, fire.conversation_id);
    Ok(())
}

/// Match reminders against the tick minute under the store lock. One-off
/// reminders are removed at plan time (exactly-once, no catch-up); daily
/// reminders record the firing date.
fn plan_reminder_fires(state: &AppState, now: DateTime<FixedOffset>) -> Vec<ReminderFire> {
    let today = clock::date_key(&now);
    let mut store = state.store();
    let mut fires = Vec::new();
    let mut fired_once = Vec::new();
    for reminder in store.reminders.iter_mut() {
        if !reminder.due_at_minute(&now) {
            continue;
        }
        fires.push(ReminderFire {
            id: reminder.id.clone(),
            conversation_id: reminder.conversation_id.clone(),
            text: format!("Reminder: {}", reminder.content),
        });
        match &reminder.schedule {
            ReminderSchedule::Daily { .. } => reminder.last_fired_on = Some(today.clone()),
            ReminderSchedule::Once { .. } => fired_once.push(reminder.id.clone()),
        }
    }
    if !fires.is_empty() {
        store.mark_reminders_dirty();
    }
    for id in fired_once {
        store.remove_reminder(&id);
    }
    fires
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
