use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Row,
};

use super::MessageStore;
use crate::error::StoreError;
use crate::types::{now_iso, ConversationSummary, LeadQuality, LeadRecord, Message, StoredLead};

/// SQLSTATE `undefined_column`.
const UNDEFINED_COLUMN: &str = "42703";

const FULL_PROJECTION: &str = "SELECT conversation_id, messages, created_at, updated_at, \
     customer_name, customer_email, customer_phone, customer_industry, customer_problem, \
     customer_availability, customer_consultation, special_notes, lead_quality, analyzed_at \
     FROM conversations ORDER BY created_at DESC, conversation_id ASC";

const BASIC_PROJECTION: &str = "SELECT conversation_id, messages, created_at, updated_at \
     FROM conversations ORDER BY created_at DESC, conversation_id ASC";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn is_missing_column_code(code: &str) -> bool {
    code == UNDEFINED_COLUMN
}

fn is_missing_column(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| is_missing_column_code(&code))
        .unwrap_or(false)
}

fn parse_summary(row: &PgRow, with_lead: bool) -> Result<ConversationSummary, StoreError> {
    let Json(messages): Json<Vec<Message>> = row.try_get("messages")?;
    let lead = if with_lead {
        parse_lead(row)?
    } else {
        None
    };
    Ok(ConversationSummary {
        conversation_id: row.try_get("conversation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        message_count: messages.len(),
        messages,
        lead,
    })
}

fn parse_lead(row: &PgRow) -> Result<Option<StoredLead>, StoreError> {
    let Some(analyzed_at) = row.try_get::<Option<String>, _>("analyzed_at")? else {
        return Ok(None);
    };
    let lead_quality = row
        .try_get::<Option<String>, _>("lead_quality")?
        .map(|q| LeadQuality::parse(&q))
        .unwrap_or_default();
    Ok(Some(StoredLead {
        record: LeadRecord {
            customer_name: row.try_get("customer_name")?,
            customer_email: row.try_get("customer_email")?,
            customer_phone: row.try_get("customer_phone")?,
            customer_industry: row.try_get("customer_industry")?,
            customer_problem: row.try_get("customer_problem")?,
            customer_availability: row.try_get("customer_availability")?,
            customer_consultation: row.try_get("customer_consultation")?,
            special_notes: row.try_get("special_notes")?,
            lead_quality,
        },
        analyzed_at,
    }))
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn get(&self, session_id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        let row = sqlx::query("SELECT messages FROM conversations WHERE conversation_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(messages): Json<Vec<Message>> = row.try_get("messages")?;
                Ok(Some(messages))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let now = now_iso();
        sqlx::query(
            r#"
            INSERT INTO conversations (conversation_id, messages, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (conversation_id) DO UPDATE SET
                messages = EXCLUDED.messages,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session_id)
        .bind(Json(messages.to_vec()))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM conversations WHERE conversation_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let (rows, with_lead) = match sqlx::query(FULL_PROJECTION).fetch_all(&self.pool).await {
            Ok(rows) => (rows, true),
            Err(err) if is_missing_column(&err) => {
                tracing::info!("lead columns not found, listing conversations without them");
                (sqlx::query(BASIC_PROJECTION).fetch_all(&self.pool).await?, false)
            }
            Err(err) => return Err(err.into()),
        };
        rows.iter()
            .map(|row| parse_summary(row, with_lead))
            .collect()
    }

    async fn save_lead(&self, session_id: &str, lead: &StoredLead) -> Result<(), StoreError> {
        let record = &lead.record;
        let result = sqlx::query(
            r#"
            UPDATE conversations SET
                customer_name = $2,
                customer_email = $3,
                customer_phone = $4,
                customer_industry = $5,
                customer_problem = $6,
                customer_availability = $7,
                customer_consultation = $8,
                special_notes = $9,
                lead_quality = $10,
                analyzed_at = $11
            WHERE conversation_id = $1
            "#,
        )
        .bind(session_id)
        .bind(&record.customer_name)
        .bind(&record.customer_email)
        .bind(&record.customer_phone)
        .bind(&record.customer_industry)
        .bind(&record.customer_problem)
        .bind(&record.customer_availability)
        .bind(record.customer_consultation)
        .bind(&record.special_notes)
        .bind(record.lead_quality.as_str())
        .bind(&lead.analyzed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_missing_column(&err) => Err(StoreError::MissingLeadColumns),
            Err(err) => Err(err.into()),
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
