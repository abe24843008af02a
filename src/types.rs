use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SESSION_ID: &str = "default";

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of a conversation history, or of a prompt sent to the
/// completion service. Stored histories never contain `Role::System`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Some(now_iso()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Some(now_iso()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: None,
        }
    }

    /// Copy without the timestamp, as sent to the completion service.
    pub fn for_prompt(&self) -> Self {
        Self {
            role: self.role,
            content: self.content.clone(),
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadQuality {
    Good,
    Ok,
    Spam,
    /// Escape value for a missing or unrecognised classification. Not a
    /// category the extraction prompt offers to the model.
    #[default]
    Unknown,
}

impl LeadQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadQuality::Good => "good",
            LeadQuality::Ok => "ok",
            LeadQuality::Spam => "spam",
            LeadQuality::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "good" => LeadQuality::Good,
            "ok" => LeadQuality::Ok,
            "spam" => LeadQuality::Spam,
            _ => LeadQuality::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_industry: Option<String>,
    pub customer_problem: Option<String>,
    pub customer_availability: Option<String>,
    #[serde(default)]
    pub customer_consultation: bool,
    pub special_notes: Option<String>,
    #[serde(default)]
    pub lead_quality: LeadQuality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLead {
    #[serde(flatten)]
    pub record: LeadRecord,
    pub analyzed_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<Message>,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub lead: Option<StoredLead>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub conversation: Vec<Message>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReply {
    pub analysis: LeadRecord,
    pub analyzed_at: String,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
