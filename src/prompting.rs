use minijinja::{context, Environment};
use serde::Serialize;

use crate::types::{Message, Role};

const CHAT_SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/chat_system_prompt.j2");
const LEAD_EXTRACTION_SYSTEM_PROMPT_TEMPLATE: &str =
    include_str!("prompts/lead_extraction_system_prompt.j2");
const LEAD_EXTRACTION_USER_PROMPT_TEMPLATE: &str =
    include_str!("prompts/lead_extraction_user_prompt.j2");

/// Bumped whenever the wording of the chat script changes.
pub const CHAT_SYSTEM_PROMPT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct TranscriptTurn<'a> {
    speaker: &'static str,
    content: &'a str,
}

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Option<String> {
    let mut env = Environment::new();
    if let Err(err) = env.add_template(name, source) {
        tracing::warn!(template = name, error = %err, "prompt template failed to compile");
        return None;
    }
    let template = env.get_template(name).ok()?;
    match template.render(ctx) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(template = name, error = %err, "prompt template failed to render");
            None
        }
    }
}

pub fn render_chat_system_prompt() -> String {
    render(
        "chat_system_prompt",
        CHAT_SYSTEM_PROMPT_TEMPLATE,
        context! {},
    )
    .unwrap_or_else(|| CHAT_SYSTEM_PROMPT_TEMPLATE.trim_end().to_string())
}

pub fn render_lead_extraction_system_prompt() -> String {
    render(
        "lead_extraction_system_prompt",
        LEAD_EXTRACTION_SYSTEM_PROMPT_TEMPLATE,
        context! {},
    )
    .unwrap_or_else(|| LEAD_EXTRACTION_SYSTEM_PROMPT_TEMPLATE.trim_end().to_string())
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "Customer",
        _ => "Assistant",
    }
}

pub fn render_lead_extraction_user_prompt(messages: &[Message]) -> String {
    let turns = messages
        .iter()
        .map(|message| TranscriptTurn {
            speaker: speaker(message.role),
            content: &message.content,
        })
        .collect::<Vec<_>>();

    render(
        "lead_extraction_user_prompt",
        LEAD_EXTRACTION_USER_PROMPT_TEMPLATE,
        context! { turns => turns },
    )
    .map(|text| text.trim_end().to_string())
    .unwrap_or_else(|| fallback_lead_extraction_user_prompt(messages))
}

fn fallback_lead_extraction_user_prompt(messages: &[Message]) -> String {
    let transcript = messages
        .iter()
        .map(|message| format!("{}: {}", speaker(message.role), message.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Analyze this conversation:\n\n{transcript}")
}
