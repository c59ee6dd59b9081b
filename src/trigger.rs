use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::clock;
use crate::subscription::Subscription;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Interval,
    Daily,
}

/// A positive trigger decision; `tag` is the dedup tag to record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Firing {
    pub kind: TriggerKind,
    pub tag: String,
}

pub struct TriggerInputs<'a> {
    pub now: DateTime<FixedOffset>,
    pub quiet: bool,
    pub after_last_msg_minutes: u64,
    pub daily_time1: Option<(u32, u32)>,
    pub daily_time2: Option<(u32, u32)>,
    pub sub: &'a Subscription,
}

pub fn interval_tag(now: &DateTime<FixedOffset>) -> String {
    format!("interval:{}", clock::hhmm_key(now))
}

pub fn daily_tag(hour: u32, minute: u32, now: &DateTime<FixedOffset>) -> String {
    format!(
        "daily:{}:{}",
        clock::fmt_hhmm(hour, minute),
        clock::date_key(now)
    )
}

/// Decide whether one conversation fires on this tick.
///
/// Quiet hours veto everything without touching the dedup tag. The
/// interval trigger is checked first; the daily times are only considered
/// when it did not fire, so a single tick never plans two sends. Dedup is
/// one minute bucket wide: a tick interval above 60s can skip a
/// same-minute daily match entirely, which is accepted rather than
/// patched with catch-up logic.
pub fn evaluate(inp: &TriggerInputs) -> Option<Firing> {
    if inp.quiet {
        return None;
    }

    if inp.after_last_msg_minutes > 0 {
        if let Some(last) = inp.sub.last_activity_at {
            let idle = inp.now.with_timezone(&Utc) - last;
            if idle >= chrono::Duration::minutes(inp.after_last_msg_minutes as i64) {
                let tag = interval_tag(&inp.now);
                if inp.sub.last_fired_tag.as_deref() != Some(tag.as_str()) {
                    return Some(Firing {
                        kind: TriggerKind::Interval,
                        tag,
                    });
                }
            }
        }
    }

    let now_hm = (inp.now.hour(), inp.now.minute());
    for (h, m) in [inp.daily_time1, inp.daily_time2].into_iter().flatten() {
        if (h, m) == now_hm {
            let tag = daily_tag(h, m, &inp.now);
            if inp.sub.last_fired_tag.as_deref() != Some(tag.as_str()) {
                return Some(Firing {
                    kind: TriggerKind::Daily,
                    tag,
                });
            }
        }
    }

    None
}
