use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::completion::{CompletionClient, CompletionProfile, CompletionRequest};
use crate::error::{ChatError, Result, StoreError};
use crate::prompting::{render_lead_extraction_system_prompt, render_lead_extraction_user_prompt};
use crate::registry::SessionRegistry;
use crate::store::MessageStore;
use crate::types::{now_iso, LeadQuality, LeadRecord, Message, StoredLead};

/// First balanced `{...}` span starting at the first `{`, string-aware.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn text_field(object: &Value, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn flag_field(object: &Value, key: &str) -> bool {
    match object.get(key) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes"
        ),
        _ => false,
    }
}

pub fn parse_lead_record(raw: &str) -> Result<LeadRecord> {
    let parse_error = || ChatError::AnalysisParse {
        raw: raw.to_string(),
    };
    let span = extract_json_object(raw).ok_or_else(parse_error)?;
    let object = serde_json::from_str::<Value>(span).map_err(|_| parse_error())?;

    Ok(LeadRecord {
        customer_name: text_field(&object, "customerName"),
        customer_email: text_field(&object, "customerEmail"),
        customer_phone: text_field(&object, "customerPhone"),
        customer_industry: text_field(&object, "customerIndustry"),
        customer_problem: text_field(&object, "customerProblem"),
        customer_availability: text_field(&object, "customerAvailability"),
        customer_consultation: flag_field(&object, "customerConsultation"),
        special_notes: text_field(&object, "specialNotes"),
        lead_quality: object
            .get("leadQuality")
            .and_then(Value::as_str)
            .map(LeadQuality::parse)
            .unwrap_or_default(),
    })
}

#[derive(Debug)]
pub struct LeadAnalysis {
    pub record: LeadRecord,
    pub analyzed_at: String,
    pub saved: bool,
    pub persistence_error: Option<StoreError>,
}

pub struct LeadExtractor {
    store: Arc<dyn MessageStore>,
    registry: Arc<SessionRegistry>,
    client: Arc<dyn CompletionClient>,
    model: String,
    system_prompt: String,
}

impl LeadExtractor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<SessionRegistry>,
        client: Arc<dyn CompletionClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            model: model.into(),
            system_prompt: render_lead_extraction_system_prompt(),
        }
    }

    fn build_request(&self, history: &[Message]) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(self.system_prompt.clone()),
                Message::user(render_lead_extraction_user_prompt(history)).for_prompt(),
            ],
            profile: CompletionProfile::ANALYSIS,
        }
    }

    pub async fn analyze(&self, session_id: &str) -> Result<LeadAnalysis> {
        let session = self.registry.resolve_or_create(session_id);
        let turn = session.lock().await;

        let stored = self.store.get(session.id()).await?;
        let history = match stored {
            Some(history) if !history.is_empty() => history,
            stored => {
                // Unknown ids must not stay registered.
                drop(turn);
                drop(session);
                self.registry.forget(session_id);
                return Err(match stored {
                    None => ChatError::NotFound(session_id.to_string()),
                    Some(_) => ChatError::EmptyHistory(session_id.to_string()),
                });
            }
        };

        let raw = self.client.complete(self.build_request(&history)).await?;
        debug!(session_id = session.id(), raw = %raw, "lead analysis response");

        let record = match parse_lead_record(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!(session_id = session.id(), "analysis response was not valid JSON");
                return Err(err);
            }
        };

        let lead = StoredLead {
            record,
            analyzed_at: now_iso(),
        };
        let persistence_error = match self.store.save_lead(session.id(), &lead).await {
            Ok(()) => {
                info!(
                    session_id = session.id(),
                    quality = lead.record.lead_quality.as_str(),
                    "lead analysis saved"
                );
                None
            }
            Err(StoreError::MissingLeadColumns) => {
                info!(
                    session_id = session.id(),
                    "lead columns not found, analysis completed but not saved"
                );
                Some(StoreError::MissingLeadColumns)
            }
            Err(err) => {
                warn!(session_id = session.id(), error = %err, "failed to save lead analysis");
                Some(err)
            }
        };

        Ok(LeadAnalysis {
            saved: persistence_error.is_none(),
            record: lead.record,
            analyzed_at: lead.analyzed_at,
            persistence_error,
        })
    }
}
