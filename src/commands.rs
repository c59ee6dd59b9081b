use std::sync::OnceLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use crate::clock;
use crate::config::Config;
use crate::reminder::Reminder;
use crate::runtime::AppState;

const COMMAND_PREFIX: &str = "/renudge";

fn set_after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^set\s+after\s+(\d+)$").expect("set after regex"))
}

fn set_daily_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^set\s+(daily1|daily2)\s+(\d{1,2}:\d{2})$").expect("set daily regex"))
}

fn set_quiet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^set\s+quiet\s+(\d{1,2}:\d{2})-(\d{1,2}:\d{2})$").expect("set quiet regex")
    })
}

fn set_history_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^set\s+history\s+(\d+)$").expect("set history regex"))
}

fn set_maxdays_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^set\s+maxdays\s+(\d+)$").expect("set maxdays regex"))
}

fn remind_once_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2})\s+(\d{1,2}:\d{2})\s+(.+)$").expect("remind once regex")
    })
}

fn remind_daily_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,2}:\d{2})\s+(.+?)\s+daily$").expect("remind daily regex")
    })
}

pub fn is_management_command(text: &str) -> bool {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix(COMMAND_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Handle one `/renudge …` management command. Returns the reply text, or
/// `None` when the message is not a management command at all. Every
/// mutation persists (config YAML or state snapshot) before the reply.
pub fn handle_command(state: &AppState, conversation_id: &str, text: &str) -> Option<String> {
    if !is_management_command(text) {
        return None;
    }
    let rest = text.trim().strip_prefix(COMMAND_PREFIX)?.trim().to_string();

    if rest.is_empty() || rest == "help" {
        return Some(help_text());
    }

    let reply = match rest.split_whitespace().next()? {
        "on" => set_enabled(state, true),
        "off" => set_enabled(state, false),
        "watch" => watch(state, conversation_id),
        "unwatch" => unwatch(state, conversation_id),
        "show" => show(state, conversation_id),
        "debug" => debug(state, conversation_id),
        "set" => set_command(state, &rest),
        "prompt" => prompt_command(state, &rest),
        "remind" => remind_command(state, conversation_id, &rest),
        _ => help_text(),
    };
    Some(reply)
}

fn help_text() -> String {
    [
        "renudge commands:",
        "/renudge on|off",
        "/renudge watch|unwatch",
        "/renudge show",
        "/renudge debug",
        "/renudge set after <minutes>",
        "/renudge set daily1 <HH:MM>",
        "/renudge set daily2 <HH:MM>",
        "/renudge set quiet <HH:MM-HH:MM>",
        "/renudge set history <n>",
        "/renudge set maxdays <days>",
        "/renudge prompt list|add <text>|del <index>|clear",
        "/renudge remind add <YYYY-MM-DD HH:MM> <text>",
        "/renudge remind add <HH:MM> <text> daily",
        "/renudge remind list | /renudge remind del <id>",
    ]
    .join("\n")
}

fn set_enabled(state: &AppState, enabled: bool) -> String {
    match state.update_config(|c| c.enabled = enabled) {
        Ok(_) if enabled => "renudge enabled.".into(),
        Ok(_) => "renudge disabled.".into(),
        Err(e) => format!("Failed to save config: {e}"),
    }
}

fn watch(state: &AppState, conversation_id: &str) -> String {
    let mode = state.snapshot_config().subscribe_mode;
    let mut store = state.store();
    store.session_mut(conversation_id).watch(mode);
    flush_noting_errors(&mut store);
    format!("Subscribed this conversation: {conversation_id}")
}

fn unwatch(state: &AppState, conversation_id: &str) -> String {
    let mut store = state.store();
    store.session_mut(conversation_id).unwatch();
    flush_noting_errors(&mut store);
    format!("Unsubscribed this conversation: {conversation_id}")
}

fn show(state: &AppState, conversation_id: &str) -> String {
    let config = state.snapshot_config();
    let store = state.store();
    let subscribed = store
        .session(conversation_id)
        .map(|s| s.subscribed)
        .unwrap_or(false);
    let info = serde_json::json!({
        "enabled": config.enabled,
        "timezone": config.timezone,
        "after_last_msg_minutes": config.after_last_msg_minutes,
        "daily_time1": config.daily_time1,
        "daily_time2": config.daily_time2,
        "quiet_hours": config.quiet_hours,
        "history_depth": config.history_depth,
        "max_no_reply_days": config.max_no_reply_days,
        "subscribed": subscribed,
    });
    let body = serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.to_string());
    format!("Current config/state:\n{body}")
}

fn debug(state: &AppState, conversation_id: &str) -> String {
    let config = state.snapshot_config();
    let store = state.store();
    let subscribed_count = store.sessions.values().filter(|s| s.subscribed).count();
    let session = store.session(conversation_id);
    [
        format!("Enabled: {}", config.enabled),
        format!("Subscribe mode: {:?}", config.subscribe_mode),
        format!("Subscribed conversations: {subscribed_count}"),
        format!("This conversation: {conversation_id}"),
        format!(
            "Subscribed here: {}",
            session.map(|s| s.subscribed).unwrap_or(false)
        ),
        format!(
            "Failed sends since last reply: {}",
            session.map(|s| s.consecutive_no_reply).unwrap_or(0)
        ),
        format!("Interval minutes: {}", config.after_last_msg_minutes),
        format!("Quiet hours: {}", config.quiet_hours),
        format!("Max no-reply days: {}", config.max_no_reply_days),
    ]
    .join("\n")
}

fn set_command(state: &AppState, rest: &str) -> String {
    if let Some(caps) = set_after_re().captures(rest) {
        let minutes: u64 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => return "Invalid minute count.".into(),
        };
        return apply_config(state, |c| c.after_last_msg_minutes = minutes, |_| {
            if minutes == 0 {
                "Interval trigger disabled.".into()
            } else {
                format!("Interval trigger set: {minutes} minute(s) after the last message")
            }
        });
    }

    if let Some(caps) = set_daily_re().captures(rest) {
        let which = caps[1].to_string();
        let value = caps[2].to_string();
        if clock::parse_hhmm(&value).is_none() {
            return format!("Invalid time '{value}', expected HH:MM.");
        }
        return apply_config(
            state,
            |c| {
                if which == "daily1" {
                    c.daily_time1 = value;
                } else {
                    c.daily_time2 = value;
                }
            },
            move |c| {
                format!(
                    "Daily check-ins: {} / {}",
                    label_or_unset(&c.daily_time1),
                    label_or_unset(&c.daily_time2)
                )
            },
        );
    }

    if let Some(caps) = set_quiet_re().captures(rest) {
        let window = format!("{}-{}", &caps[1], &caps[2]);
        return apply_config(
            state,
            |c| c.quiet_hours = window,
            |c| {
                if c.quiet_hours.is_empty() {
                    "Quiet hours rejected as malformed and disabled.".into()
                } else {
                    format!("Quiet hours set: {}", c.quiet_hours)
                }
            },
        );
    }

    if let Some(caps) = set_history_re().captures(rest) {
        let depth: usize = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => return "Invalid history depth.".into(),
        };
        return apply_config(state, |c| c.history_depth = depth, move |_| {
            format!("History depth set: {depth}")
        });
    }

    if let Some(caps) = set_maxdays_re().captures(rest) {
        let days: u64 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => return "Invalid day count.".into(),
        };
        return apply_config(state, |c| c.max_no_reply_days = days, |_| {
            if days == 0 {
                "Idle auto-unsubscribe disabled.".into()
            } else {
                format!("Auto-unsubscribe after {days} day(s) without a reply")
            }
        });
    }

    "Usage: /renudge set after|daily1|daily2|quiet|history|maxdays <value>".into()
}

fn prompt_command(state: &AppState, rest: &str) -> String {
    let args = rest.strip_prefix("prompt").map(str::trim).unwrap_or("");

    if args == "list" {
        let prompts = state.snapshot_config().custom_prompts;
        if prompts.is_empty() {
            return "No custom prompts configured.".into();
        }
        let mut out = String::from("Custom prompts:\n");
        for (i, p) in prompts.iter().enumerate() {
            let preview: String = p.chars().take(50).collect();
            let ellipsis = if p.chars().count() > 50 { "..." } else { "" };
            out.push_str(&format!("{}. {preview}{ellipsis}\n", i + 1));
        }
        return out.trim_end().to_string();
    }

    if let Some(content) = args.strip_prefix("add") {
        let content = content.trim();
        if content.is_empty() {
            return "Prompt text must not be empty.".into();
        }
        let content = content.to_string();
        return apply_config(state, |c| c.custom_prompts.push(content), |c| {
            format!("Prompt added ({} total).", c.custom_prompts.len())
        });
    }

    if let Some(index) = args.strip_prefix("del") {
        let Ok(index) = index.trim().parse::<usize>() else {
            return "Prompt index must be a number.".into();
        };
        let count = state.snapshot_config().custom_prompts.len();
        if index == 0 || index > count {
            return "Prompt index out of range.".into();
        }
        return apply_config(state, |c| {
            c.custom_prompts.remove(index - 1);
        }, |c| format!("Prompt removed ({} remaining).", c.custom_prompts.len()));
    }

    if args == "clear" {
        return apply_config(state, |c| c.custom_prompts.clear(), |_| {
            "All custom prompts cleared.".into()
        });
    }

    "Usage: /renudge prompt list|add <text>|del <index>|clear".into()
}

fn remind_command(state: &AppState, conversation_id: &str, rest: &str) -> String {
    let args = rest.strip_prefix("remind").map(str::trim).unwrap_or("");

    if args == "list" {
        let store = state.store();
        let list = store.reminders_for(conversation_id);
        if list.is_empty() {
            return "No reminders.".into();
        }
        let mut out = String::from("Reminders:\n");
        for r in list {
            out.push_str(&r.describe());
            out.push('\n');
        }
        return out.trim_end().to_string();
    }

    if let Some(id) = args.strip_prefix("del") {
        let id = id.trim();
        let mut store = state.store();
        let owned = store
            .reminders
            .iter()
            .any(|r| r.id == id && r.conversation_id == conversation_id);
        if owned && store.remove_reminder(id) {
            flush_noting_errors(&mut store);
            return format!("Reminder {id} deleted.");
        }
        return "No reminder with that id.".into();
    }

    if let Some(detail) = args.strip_prefix("add") {
        let detail = detail.trim();
        if let Some(caps) = remind_once_re().captures(detail) {
            let date = &caps[1];
            let time = &caps[2];
            let content = caps[3].trim();
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                return format!("Invalid date '{date}', expected YYYY-MM-DD.");
            }
            let Some((h, m)) = clock::parse_hhmm(time) else {
                return format!("Invalid time '{time}', expected HH:MM.");
            };
            let due_at = format!("{date} {}", clock::fmt_hhmm(h, m));
            let reminder = Reminder::once(conversation_id, content, due_at.clone(), Utc::now());
            let id = reminder.id.clone();
            let mut store = state.store();
            store.add_reminder(reminder);
            flush_noting_errors(&mut store);
            return format!("One-off reminder {id} set for {due_at}.");
        }
        if let Some(caps) = remind_daily_re().captures(detail) {
            let time = &caps[1];
            let content = caps[2].trim();
            let Some((h, m)) = clock::parse_hhmm(time) else {
                return format!("Invalid time '{time}', expected HH:MM.");
            };
            let time_of_day = clock::fmt_hhmm(h, m);
            let reminder =
                Reminder::daily(conversation_id, content, time_of_day.clone(), Utc::now());
            let id = reminder.id.clone();
            let mut store = state.store();
            store.add_reminder(reminder);
            flush_noting_errors(&mut store);
            return format!("Daily reminder {id} set for {time_of_day}.");
        }
    }

    "Usage: /renudge remind add <YYYY-MM-DD HH:MM> <text>  or  /renudge remind add <HH:MM> <text> daily".into()
}

fn apply_config(
    state: &AppState,
    mutate: impl FnOnce(&mut Config),
    reply: impl FnOnce(&Config) -> String,
) -> String {
    match state.update_config(mutate) {
        Ok(config) => reply(&config),
        Err(e) => format!("Failed to save config: {e}"),
    }
}

fn label_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "unset"
    } else {
        value
    }
}

fn flush_noting_errors(store: &mut crate::store::StateStore) {
    // Memory stays authoritative on a failed write; the next tick retries.
    if let Err(e) = store.flush() {
        warn!("State flush failed after management command: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscribeMode;
    use crate::dispatch::{LogDispatcher, NoHistory, NoPersonas};
    use crate::prompt::UniformSelector;
    use std::sync::Arc;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        let state = AppState::new(
            config,
            None,
            Arc::new(LogDispatcher),
            Arc::new(NoHistory),
            Arc::new(NoPersonas),
            Arc::new(UniformSelector),
        );
        (state, dir)
    }

    #[test]
    fn test_is_management_command() {
        assert!(is_management_command("/renudge watch"));
        assert!(is_management_command("  /renudge"));
        assert!(!is_management_command("/renudgex"));
        assert!(!is_management_command("hello"));
    }

    #[test]
    fn test_non_command_returns_none() {
        let (state, _dir) = test_state();
        assert!(handle_command(&state, "chat:1", "just chatting").is_none());
    }

    #[test]
    fn test_help_on_bare_command() {
        let (state, _dir) = test_state();
        let reply = handle_command(&state, "chat:1", "/renudge").unwrap();
        assert!(reply.contains("watch|unwatch"));
    }

    #[test]
    fn test_on_off_toggle() {
        let (state, _dir) = test_state();
        let reply = handle_command(&state, "chat:1", "/renudge off").unwrap();
        assert!(reply.contains("disabled"));
        assert!(!state.snapshot_config().enabled);
        handle_command(&state, "chat:1", "/renudge on").unwrap();
        assert!(state.snapshot_config().enabled);
    }

    #[test]
    fn test_watch_unwatch() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge watch").unwrap();
        assert!(state.store().session("chat:1").unwrap().subscribed);
        handle_command(&state, "chat:1", "/renudge unwatch").unwrap();
        assert!(!state.store().session("chat:1").unwrap().subscribed);
    }

    #[test]
    fn test_set_after() {
        let (state, _dir) = test_state();
        let reply = handle_command(&state, "chat:1", "/renudge set after 45").unwrap();
        assert!(reply.contains("45"));
        assert_eq!(state.snapshot_config().after_last_msg_minutes, 45);
    }

    #[test]
    fn test_set_daily_collision_reports_shifted_time() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge set daily1 9:00").unwrap();
        let reply = handle_command(&state, "chat:1", "/renudge set daily2 9:00").unwrap();
        assert!(reply.contains("09:00"));
        assert!(reply.contains("09:01"));
        assert_eq!(state.snapshot_config().daily_time2, "09:01");
    }

    #[test]
    fn test_set_quiet() {
        let (state, _dir) = test_state();
        let reply = handle_command(&state, "chat:1", "/renudge set quiet 23:00-07:00").unwrap();
        assert!(reply.contains("23:00-07:00"));
        assert_eq!(state.snapshot_config().quiet_hours, "23:00-07:00");
    }

    #[test]
    fn test_set_history_and_maxdays() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge set history 12").unwrap();
        handle_command(&state, "chat:1", "/renudge set maxdays 7").unwrap();
        let config = state.snapshot_config();
        assert_eq!(config.history_depth, 12);
        assert_eq!(config.max_no_reply_days, 7);
    }

    #[test]
    fn test_prompt_lifecycle() {
        let (state, _dir) = test_state();
        assert!(handle_command(&state, "chat:1", "/renudge prompt list")
            .unwrap()
            .contains("No custom prompts"));
        handle_command(&state, "chat:1", "/renudge prompt add say hi to {umo}").unwrap();
        handle_command(&state, "chat:1", "/renudge prompt add ask about {last_user}").unwrap();
        let listing = handle_command(&state, "chat:1", "/renudge prompt list").unwrap();
        assert!(listing.contains("1. say hi to {umo}"));
        assert!(listing.contains("2. ask about {last_user}"));
        let reply = handle_command(&state, "chat:1", "/renudge prompt del 1").unwrap();
        assert!(reply.contains("1 remaining"));
        assert_eq!(
            state.snapshot_config().custom_prompts,
            vec!["ask about {last_user}".to_string()]
        );
        handle_command(&state, "chat:1", "/renudge prompt clear").unwrap();
        assert!(state.snapshot_config().custom_prompts.is_empty());
    }

    #[test]
    fn test_prompt_del_out_of_range() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge prompt add hello").unwrap();
        let reply = handle_command(&state, "chat:1", "/renudge prompt del 5").unwrap();
        assert!(reply.contains("out of range"));
    }

    #[test]
    fn test_remind_add_once_normalizes_time() {
        let (state, _dir) = test_state();
        let reply =
            handle_command(&state, "chat:1", "/renudge remind add 2025-12-01 9:30 standup")
                .unwrap();
        assert!(reply.contains("2025-12-01 09:30"));
        let store = state.store();
        assert_eq!(store.reminders.len(), 1);
        assert!(store.reminders[0].is_once());
    }

    #[test]
    fn test_remind_add_daily() {
        let (state, _dir) = test_state();
        let reply =
            handle_command(&state, "chat:1", "/renudge remind add 15:00 stretch daily").unwrap();
        assert!(reply.contains("15:00"));
        let store = state.store();
        assert_eq!(store.reminders.len(), 1);
        assert!(!store.reminders[0].is_once());
    }

    #[test]
    fn test_remind_add_rejects_bad_date() {
        let (state, _dir) = test_state();
        let reply =
            handle_command(&state, "chat:1", "/renudge remind add 2025-13-40 09:30 x").unwrap();
        assert!(reply.contains("Invalid date"));
        assert!(state.store().reminders.is_empty());
    }

    #[test]
    fn test_remind_del_only_own_conversation() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge remind add 15:00 stretch daily").unwrap();
        let id = state.store().reminders[0].id.clone();
        let reply = handle_command(&state, "chat:2", &format!("/renudge remind del {id}")).unwrap();
        assert!(reply.contains("No reminder"));
        let reply = handle_command(&state, "chat:1", &format!("/renudge remind del {id}")).unwrap();
        assert!(reply.contains("deleted"));
        assert!(state.store().reminders.is_empty());
    }

    #[test]
    fn test_remind_list_scoped_to_conversation() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge remind add 15:00 stretch daily").unwrap();
        handle_command(&state, "chat:2", "/renudge remind add 16:00 water daily").unwrap();
        let listing = handle_command(&state, "chat:1", "/renudge remind list").unwrap();
        assert!(listing.contains("stretch"));
        assert!(!listing.contains("water"));
    }

    #[test]
    fn test_show_reports_subscription() {
        let (state, _dir) = test_state();
        handle_command(&state, "chat:1", "/renudge watch").unwrap();
        let reply = handle_command(&state, "chat:1", "/renudge show").unwrap();
        assert!(reply.contains("\"subscribed\": true"));
    }

    #[test]
    fn test_debug_counts_subscriptions() {
        let (state, _dir) = test_state();
        state.note_user_message("chat:1", "hi");
        handle_command(&state, "chat:1", "/renudge watch").unwrap();
        let reply = handle_command(&state, "chat:1", "/renudge debug").unwrap();
        assert!(reply.contains("Subscribed conversations: 1"));
        assert!(reply.contains("Subscribed here: true"));
    }

    #[test]
    fn test_mode_affects_watch_record() {
        let (state, _dir) = test_state();
        state.update_config(|c| c.subscribe_mode = SubscribeMode::Auto).unwrap();
        handle_command(&state, "chat:1", "/renudge watch").unwrap();
        assert_eq!(
            state.store().session("chat:1").unwrap().mode,
            SubscribeMode::Auto
        );
    }
}
