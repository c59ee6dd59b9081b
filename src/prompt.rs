use rand::Rng;

use crate::subscription::ChatTurn;

/// Sent when no custom templates are configured: let the model pick the
/// thread back up on its own.
pub const CONTINUATION_PROMPT: &str = "Continue the conversation with the user naturally.";

/// Seam for template selection so tests can pin the choice.
pub trait PromptSelector: Send + Sync {
    /// Pick an index in `0..len`. Callers guarantee `len > 0`.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform random selection, the production default.
pub struct UniformSelector;

impl PromptSelector for UniformSelector {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

pub struct PlaceholderValues<'a> {
    pub now: &'a str,
    pub last_user: &'a str,
    pub last_ai: &'a str,
    pub umo: &'a str,
}

/// Expand the closed placeholder set. Unknown `{...}` sequences are left
/// untouched rather than treated as substitution points.
pub fn expand_template(template: &str, vals: &PlaceholderValues) -> String {
    template
        .replace("{now}", vals.now)
        .replace("{last_user}", vals.last_user)
        .replace("{last_ai}", vals.last_ai)
        .replace("{umo}", vals.umo)
}

/// Pick one template and expand it; with no templates configured, fall
/// back to the model-continuation prompt.
pub fn select_prompt(
    prompts: &[String],
    selector: &dyn PromptSelector,
    vals: &PlaceholderValues,
) -> String {
    if prompts.is_empty() {
        return CONTINUATION_PROMPT.to_string();
    }
    let idx = selector.pick(prompts.len()).min(prompts.len() - 1);
    expand_template(prompts[idx].trim(), vals)
}

/// Most recent user and assistant turns, scanned newest-first.
pub fn last_user_and_ai(turns: &[ChatTurn]) -> (String, String) {
    let mut last_user = String::new();
    let mut last_ai = String::new();
    for turn in turns.iter().rev() {
        if last_user.is_empty() && turn.role == "user" {
            last_user = turn.content.clone();
        }
        if last_ai.is_empty() && turn.role == "assistant" {
            last_ai = turn.content.clone();
        }
        if !last_user.is_empty() && !last_ai.is_empty() {
            break;
        }
    }
    (last_user, last_ai)
}
