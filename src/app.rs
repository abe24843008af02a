use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::completion::{CompletionClient, OpenAiClient};
use crate::config::{Config, StoreBackend};
use crate::engine::ConversationEngine;
use crate::error::{ChatError, StartupError, StoreError};
use crate::lead::LeadExtractor;
use crate::prompting::CHAT_SYSTEM_PROMPT_VERSION;
use crate::registry::{normalize_session_id, SessionRegistry};
use crate::store::{MemoryStore, MessageStore, PostgresStore};
use crate::types::{now_iso, AnalysisReply, ChatBody, ChatReply};

pub struct AppState {
    pub engine: ConversationEngine,
    pub extractor: LeadExtractor,
    pub store: Arc<dyn MessageStore>,
    pub registry: Arc<SessionRegistry>,
    pub environment: String,
    pub openai_configured: bool,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn MessageStore>,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            engine: ConversationEngine::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&client),
                config.chat_model.clone(),
                config.history_window,
            ),
            extractor: LeadExtractor::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&client),
                config.analysis_model.clone(),
            ),
            store,
            registry,
            environment: config.environment.clone(),
            openai_configured: client.is_configured(),
        }
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

/// Adds the bare `OPTIONS` answer and the JSON 405 to a route.
fn endpoint(methods: MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>> {
    methods.options(preflight).fallback(method_not_allowed)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", endpoint(post(post_chat)))
        .route("/session", endpoint(post(post_session)))
        .route("/conversations", endpoint(get(get_conversations)))
        .route(
            "/conversation/{session_id}",
            endpoint(get(get_conversation).delete(delete_conversation)),
        )
        .route(
            "/conversation/{session_id}/analyze",
            endpoint(post(analyze_conversation)),
        )
        .route("/health", endpoint(get(health)))
}

/// Every route is served at its bare path and again under `/api`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let routes = api_routes();
    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn required_session_id(raw: &str) -> Result<&str, ChatError> {
    let session_id = raw.trim();
    if session_id.is_empty() {
        return Err(ChatError::Validation("Session ID is required".to_string()));
    }
    Ok(session_id)
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<ChatReply>, ChatError> {
    let Json(body) = body.map_err(|err| {
        debug!(error = %err.body_text(), "rejected chat body");
        ChatError::Validation(err.body_text())
    })?;
    let message = body
        .message
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ChatError::Validation("Message is required".to_string()))?;
    let session_id = normalize_session_id(body.session_id.as_deref());

    let outcome = state.engine.submit_turn(&session_id, &message).await?;
    // The store error itself is logged by the engine.
    let warning = outcome
        .persistence_error
        .map(|_| "Reply generated but the conversation could not be saved.".to_string());

    Ok(Json(ChatReply {
        response: outcome.response,
        conversation: outcome.conversation,
        session_id: outcome.session_id,
        warning,
    }))
}

async fn post_session() -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(json!({ "sessionId": Uuid::new_v4().to_string() })),
    )
}

async fn get_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let conversations = state.store.list_all().await?;
    Ok(Json(json!({ "conversations": conversations })))
}

async fn get_conversation(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let session_id = required_session_id(&session_id)?;
    let conversation = state.engine.conversation(session_id).await?;
    Ok(Json(json!({ "conversation": conversation })))
}

async fn delete_conversation(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ChatError> {
    let session_id = required_session_id(&session_id)?;
    state.engine.clear(session_id).await?;
    Ok(Json(json!({ "message": "Conversation cleared successfully" })))
}

async fn analyze_conversation(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ChatError> {
    let session_id = required_session_id(&session_id)?;
    let analysis = state.extractor.analyze(session_id).await?;

    let warning = match analysis.persistence_error {
        None => None,
        Some(StoreError::MissingLeadColumns) => Some(
            "Analysis columns not found, analysis completed but not saved to database".to_string(),
        ),
        Some(err) => {
            // The computed analysis still goes back with the error.
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to save analysis to database.",
                    "code": "persistence_error",
                    "details": err.to_string(),
                    "analysis": analysis.record,
                    "analyzed_at": analysis.analyzed_at,
                })),
            )
                .into_response());
        }
    };

    Ok(Json(AnalysisReply {
        analysis: analysis.record,
        analyzed_at: analysis.analyzed_at,
        saved: analysis.saved,
        warning,
    })
    .into_response())
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.count().await {
        Ok(count) => Json(json!({
            "status": "OK",
            "timestamp": now_iso(),
            "conversationsCount": count,
            "environment": state.environment,
            "openaiConfigured": state.openai_configured,
            "store": state.store.backend_name(),
        }))
        .into_response(),
        Err(err) => {
            warn!(error = %err, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "ERROR",
                    "timestamp": now_iso(),
                    "error": "Database connection failed",
                })),
            )
                .into_response()
        }
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn MessageStore>, StartupError> {
    match &config.store {
        StoreBackend::Memory => {
            warn!("using the in-memory store; conversations are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresStore::connect(url, *max_connections).await?;
            if config.run_migrations {
                store.migrate().await?;
                info!("database migrations applied");
            }
            Ok(Arc::new(store))
        }
    }
}

pub async fn run(config: Config) -> Result<(), StartupError> {
    let store = open_store(&config).await?;
    let client = Arc::new(OpenAiClient::new(
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.completion_timeout,
    ));
    if !config.openai_configured() {
        warn!("OpenAI API key not configured; set OPENAI_API_KEY to enable replies");
    }

    let state = Arc::new(AppState::new(&config, store, client));
    let app = router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        port = config.port,
        environment = %config.environment,
        chat_model = %config.chat_model,
        prompt_version = CHAT_SYSTEM_PROMPT_VERSION,
        "nio chat server running at http://localhost:{}",
        config.port
    );
    axum::serve(listener, app).await?;
    Ok(())
}
