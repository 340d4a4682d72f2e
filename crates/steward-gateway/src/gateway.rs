//! Gateway implementation
//!
//! Three logical entry points over JSON/HTTP:
//! - `POST /agent-chat`: a conversation turn with the LLM collaborator,
//!   every proposed tool call gated by the decision engine
//! - `POST /agent-heartbeat`: the scheduled proactive sweep plus outcome
//!   measurement and rule decay; requires the scheduler secret
//! - `POST /agent-learning`: corrections, error classification and
//!   feedback processing

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use steward_core::{
    CandidateAction, DecisionEngine, Disposition, DomainCategory, EmbeddingProvider, ErrorKind,
    FixtureFeed, HashEmbedder, HeartbeatScanner, HttpEmbedder, HttpPortfolioFeed, KnowledgeStore,
    LearningPipeline, NoopExecutor, OutcomeTracker, OwnerFeedback, PortfolioFeed, SourceQuality,
    ToolExecutor, ToolKind, ToolRegistry,
};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::llm::{ChatMessage, HttpLlmClient, LlmClient, LlmRequest, RetryingClient};
use crate::session::ConversationStore;
use crate::tools::HttpToolExecutor;

/// Upper bound on LLM tool rounds per chat turn
const MAX_TOOL_ROUNDS: usize = 4;

/// System prompt framing the collaborator's role
const SYSTEM_PROMPT: &str = "You are Steward, a property-management assistant. \
    Use the provided tools to look up portfolio state and to propose actions \
    on the owner's behalf. Actions you request may be executed, drafted for \
    approval, or surfaced as suggestions depending on the owner's autonomy \
    settings; respect the returned status.";

/// Shared state across handlers
pub struct GatewayState {
    /// Loaded configuration
    pub config: GatewayConfig,
    /// Knowledge store
    pub store: Arc<KnowledgeStore>,
    /// Decision engine
    pub engine: Arc<DecisionEngine>,
    /// Learning pipeline
    pub pipeline: Arc<LearningPipeline>,
    /// Heartbeat scanner
    pub scanner: Arc<HeartbeatScanner>,
    /// Outcome tracker
    pub tracker: Arc<OutcomeTracker>,
    /// LLM collaborator
    pub llm: Arc<dyn LlmClient>,
    /// Tool executor
    pub executor: Arc<dyn ToolExecutor>,
    /// Conversation sessions
    pub conversations: ConversationStore,
    /// Registered tools
    pub registry: ToolRegistry,
}

impl GatewayState {
    /// Assemble state from explicit parts. Tests inject mock collaborators
    /// here; production uses [`GatewayState::from_config`].
    pub fn new(
        config: GatewayConfig,
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
        feed: Arc<dyn PortfolioFeed>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let engine = Arc::new(DecisionEngine::new(store.clone(), embedder.clone()));
        let pipeline = Arc::new(LearningPipeline::new(store.clone(), embedder));
        let scanner = Arc::new(HeartbeatScanner::new(
            feed,
            engine.clone(),
            executor.clone(),
        ));
        let tracker = Arc::new(OutcomeTracker::new(store.clone()));

        Self {
            config,
            store,
            engine,
            pipeline,
            scanner,
            tracker,
            llm,
            executor,
            conversations: ConversationStore::new(),
            registry: ToolRegistry::property_management(),
        }
    }

    /// Assemble production state from configuration
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let store = Arc::new(KnowledgeStore::open(&config.database_path)?);

        let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding.endpoint {
            Some(endpoint) => Arc::new(HttpEmbedder::new(endpoint)),
            None => Arc::new(HashEmbedder::new()),
        };

        let llm: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(
            HttpLlmClient::new(&config.llm),
            config.llm.retry,
        ));

        let (feed, executor): (Arc<dyn PortfolioFeed>, Arc<dyn ToolExecutor>) =
            match &config.backend.base_url {
                Some(base_url) => {
                    let token = config.backend.service_token.clone().unwrap_or_default();
                    (
                        Arc::new(HttpPortfolioFeed::new(base_url.clone(), token.clone())),
                        Arc::new(HttpToolExecutor::new(base_url.clone(), token)),
                    )
                }
                None => (Arc::new(FixtureFeed::new()), Arc::new(NoopExecutor)),
            };

        Ok(Self::new(config, store, embedder, llm, feed, executor))
    }
}

/// The HTTP gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a gateway over assembled state
    pub fn new(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Gateway state
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/agent-chat", post(handle_chat))
            .route("/agent-heartbeat", post(handle_heartbeat))
            .route("/agent-learning", post(handle_learning))
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start serving
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let router = self.build_router();

        tracing::info!(%addr, "steward gateway starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// agent-chat
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(rename = "conversationId")]
    conversation_id: Option<Uuid>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PendingAction {
    id: Uuid,
    tool_name: String,
    description: String,
    category: DomainCategory,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    #[serde(rename = "conversationId")]
    conversation_id: Uuid,
    message: String,
    #[serde(rename = "tokensUsed")]
    tokens_used: u32,
    #[serde(rename = "toolsUsed")]
    tools_used: Vec<String>,
    #[serde(rename = "pendingActions", skip_serializing_if = "Vec::is_empty")]
    pending_actions: Vec<PendingAction>,
}

/// Resolve the acting user: `x-steward-user` header first, then the body
fn resolve_user(headers: &HeaderMap, body_user: Option<&str>) -> Result<String> {
    headers
        .get("x-steward-user")
        .and_then(|v| v.to_str().ok())
        .or(body_user)
        .filter(|u| !u.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::InvalidRequest("missing user identifier".to_string()))
}

async fn handle_chat(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    if request.message.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("empty message".to_string()));
    }
    let user_id = resolve_user(&headers, request.user_id.as_deref())?;

    let conversation_id = state
        .conversations
        .get_or_create(&user_id, request.conversation_id);
    state
        .conversations
        .append(conversation_id, ChatMessage::user(&request.message));

    let mut tokens_used = 0u32;
    let mut tools_used = Vec::new();
    let mut pending_actions = Vec::new();
    let mut final_message = String::new();

    for round in 0..MAX_TOOL_ROUNDS {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        }];
        messages.extend(state.conversations.history(conversation_id));

        let response = state
            .llm
            .complete(LlmRequest {
                messages,
                tools: state.registry.all().to_vec(),
                max_tokens: state.config.llm.max_tokens,
            })
            .await?;
        tokens_used += response.tokens_used;

        if response.tool_calls.is_empty() {
            if !response.content.is_empty() {
                final_message = response.content;
                state
                    .conversations
                    .append(conversation_id, ChatMessage::assistant(&final_message));
            }
            break;
        }

        if !response.content.is_empty() {
            state
                .conversations
                .append(conversation_id, ChatMessage::assistant(&response.content));
            final_message = response.content;
        }

        for call in response.tool_calls {
            tools_used.push(call.name.clone());
            let result = dispatch_tool_call(
                &state,
                &user_id,
                &call.name,
                &call.arguments,
                &mut pending_actions,
            )
            .await;
            state.conversations.append(
                conversation_id,
                ChatMessage::tool(
                    serde_json::json!({ "tool": call.name, "result": result }).to_string(),
                ),
            );
        }

        if round == MAX_TOOL_ROUNDS - 1 {
            tracing::warn!(conversation = %conversation_id, "tool round budget exhausted");
        }
    }

    Ok(Json(ChatResponse {
        conversation_id,
        message: final_message,
        tokens_used,
        tools_used,
        pending_actions,
    }))
}

/// Evaluate one proposed tool call through the engine and act on the
/// disposition. Returns the JSON payload handed back to the model.
async fn dispatch_tool_call(
    state: &GatewayState,
    user_id: &str,
    tool_name: &str,
    arguments: &serde_json::Value,
    pending_actions: &mut Vec<PendingAction>,
) -> serde_json::Value {
    let Some(tool) = state.registry.get(tool_name) else {
        return serde_json::json!({ "status": "error", "error": "unknown tool" });
    };

    let input_summary = format!("{tool_name}: {arguments}");
    let candidate = CandidateAction {
        tool: tool.clone(),
        input_summary: input_summary.clone(),
        source: SourceQuality::CachedRecent,
        embedding: None,
    };

    let evaluation = match state.engine.evaluate(user_id, candidate).await {
        Ok(evaluation) => evaluation,
        Err(e) => {
            tracing::error!(tool = tool_name, error = %e, "evaluation failed");
            return serde_json::json!({ "status": "error", "error": e.to_string() });
        }
    };

    match evaluation.disposition {
        Disposition::Block => serde_json::json!({
            "status": "blocked",
            "reason": "autonomy is disabled for this category",
        }),
        Disposition::Suggest => serde_json::json!({
            "status": "suggested",
            "note": "surfaced to the owner as a suggestion; not prepared or executed",
        }),
        Disposition::Draft => {
            pending_actions.push(PendingAction {
                id: evaluation.decision_id,
                tool_name: tool_name.to_string(),
                description: input_summary,
                category: tool.category,
            });
            serde_json::json!({
                "status": "pending_approval",
                "decision_id": evaluation.decision_id,
            })
        }
        Disposition::AutoWithNotice | Disposition::AutoSilent => {
            // The agent's own memory tools run against the knowledge
            // store, not the business backend.
            if tool.kind == ToolKind::Memory {
                return execute_memory_tool(state, user_id, tool_name, arguments).await;
            }
            match state.executor.execute(user_id, tool_name, arguments).await {
                Ok(result) => serde_json::json!({ "status": "executed", "result": result }),
                Err(e) => {
                    // Best-effort learning from the failure; never let it
                    // break the chat turn.
                    if let Err(learn_err) = state
                        .pipeline
                        .classify_and_learn(
                            user_id,
                            ErrorKind::ToolMisuse,
                            tool_name,
                            &e.to_string(),
                            &input_summary,
                            tool.category,
                        )
                        .await
                    {
                        tracing::warn!(error = %learn_err, "failed to learn from tool error");
                    }
                    serde_json::json!({ "status": "error", "error": e.to_string() })
                }
            }
        }
    }
}

/// Serve `recall_memory` and `remember_preference` from the engine's own
/// semantic memory
async fn execute_memory_tool(
    state: &GatewayState,
    user_id: &str,
    tool_name: &str,
    arguments: &serde_json::Value,
) -> serde_json::Value {
    let str_arg = |key: &str| {
        arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    match tool_name {
        "recall_memory" => {
            let Some(query) = str_arg("query").or_else(|| str_arg("detail")) else {
                return serde_json::json!({ "status": "error", "error": "missing query" });
            };
            match state.pipeline.recall(user_id, &query, 8).await {
                Ok(hits) => serde_json::json!({ "status": "executed", "hits": hits }),
                Err(e) => serde_json::json!({ "status": "error", "error": e.to_string() }),
            }
        }
        "remember_preference" => {
            let Some(value) = str_arg("value").or_else(|| str_arg("detail")) else {
                return serde_json::json!({ "status": "error", "error": "missing value" });
            };
            let key = str_arg("key").unwrap_or_else(|| format!("remembered:{user_id}"));
            let category = str_arg("category")
                .and_then(|c| DomainCategory::from_str(&c).ok())
                .unwrap_or(DomainCategory::General);
            match state.pipeline.remember(user_id, &key, &value, category).await {
                Ok(id) => serde_json::json!({ "status": "executed", "preference_id": id }),
                Err(e) => serde_json::json!({ "status": "error", "error": e.to_string() }),
            }
        }
        other => {
            serde_json::json!({ "status": "error", "error": format!("unknown memory tool {other}") })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// agent-heartbeat
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HeartbeatParams {
    user_id: Option<String>,
}

/// Heartbeat is a scheduler/service surface, never an end-user one
fn require_scheduler(headers: &HeaderMap, config: &GatewayConfig) -> Result<()> {
    let Some(expected) = &config.scheduler_secret else {
        // No secret configured: open, for local development
        return Ok(());
    };

    let presented = headers
        .get("x-steward-scheduler-secret")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized(
            "heartbeat requires the scheduler secret".to_string(),
        ))
    }
}

async fn handle_heartbeat(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HeartbeatParams>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    require_scheduler(&headers, &state.config)?;

    let sweep = state.scanner.run(params.user_id.as_deref()).await?;
    let outcomes = state
        .tracker
        .run(
            state.config.heartbeat.decay_days,
            state.config.heartbeat.decay_amount,
        )
        .await?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "sweep": sweep,
        "outcomes": outcomes,
    })))
}

// ─────────────────────────────────────────────────────────────────────────
// agent-learning
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum LearningRequest {
    RecordCorrection {
        user_id: String,
        original_action: String,
        correction: String,
        #[serde(default)]
        context_snapshot: serde_json::Value,
        category: String,
    },
    ClassifyAndLearn {
        user_id: String,
        error_type: String,
        tool_name: String,
        error_message: String,
        #[serde(default)]
        input_summary: String,
        category: String,
    },
    ProcessFeedback {
        user_id: String,
        decision_id: Uuid,
        feedback: String,
    },
}

fn parse_category(s: &str) -> Result<DomainCategory> {
    DomainCategory::from_str(s).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}

async fn handle_learning(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<LearningRequest>,
) -> Result<Json<serde_json::Value>> {
    match request {
        LearningRequest::RecordCorrection {
            user_id,
            original_action,
            correction,
            context_snapshot,
            category,
        } => {
            let category = parse_category(&category)?;
            let id = state
                .pipeline
                .record_correction(&user_id, &original_action, &correction, context_snapshot, category)
                .await?;
            Ok(Json(serde_json::json!({ "id": id })))
        }

        LearningRequest::ClassifyAndLearn {
            user_id,
            error_type,
            tool_name,
            error_message,
            input_summary,
            category,
        } => {
            let error_kind = ErrorKind::from_str(&error_type)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            let category = parse_category(&category)?;
            let result = state
                .pipeline
                .classify_and_learn(
                    &user_id,
                    error_kind,
                    &tool_name,
                    &error_message,
                    &input_summary,
                    category,
                )
                .await?;
            Ok(Json(serde_json::to_value(result)?))
        }

        LearningRequest::ProcessFeedback {
            user_id,
            decision_id,
            feedback,
        } => {
            let feedback = OwnerFeedback::from_str(&feedback)
                .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            state
                .pipeline
                .process_feedback(&user_id, decision_id, feedback)?;
            Ok(Json(serde_json::json!({ "ok": true })))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// health / status
// ─────────────────────────────────────────────────────────────────────────

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

async fn handle_status(State(state): State<Arc<GatewayState>>) -> Result<Json<serde_json::Value>> {
    let counts = state.store.counts()?;
    Ok(Json(serde_json::json!({
        "version": crate::VERSION,
        "model": state.llm.model_name(),
        "conversations": state.conversations.len(),
        "store": counts,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, ToolCall};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    /// Scripted collaborator: pops one canned response per call
    struct ScriptedLlm {
        script: Mutex<Vec<LlmResponse>>,
    }

    impl ScriptedLlm {
        fn new(mut responses: Vec<LlmResponse>) -> Self {
            responses.reverse();
            Self {
                script: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(self.script.lock().pop().unwrap_or_default())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn text_response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            tokens_used: 10,
        }
    }

    fn tool_response(tool: &str) -> LlmResponse {
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call-1".to_string(),
                name: tool.to_string(),
                arguments: serde_json::json!({ "entity_id": "job-1" }),
            }],
            tokens_used: 20,
        }
    }

    fn test_gateway(llm: Arc<dyn LlmClient>) -> Gateway {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let state = GatewayState::new(
            GatewayConfig::default(),
            store,
            Arc::new(HashEmbedder::new()),
            llm,
            Arc::new(FixtureFeed::new()),
            Arc::new(NoopExecutor),
        );
        Gateway::new(state)
    }

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/agent-chat")
            .header("content-type", "application/json")
            .header("x-steward-user", "owner-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_plain_reply() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![text_response(
            "Two tenancies are overdue this week.",
        )])));
        let router = gateway.build_router();

        let response = router
            .oneshot(chat_request(serde_json::json!({ "message": "rent status?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["message"], "Two tenancies are overdue this week.");
        assert_eq!(json["tokensUsed"], 10);
        assert!(json.get("pendingActions").is_none());
    }

    #[tokio::test]
    async fn test_chat_missing_user_is_rejected() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![])));
        let router = gateway.build_router();

        let request = Request::builder()
            .method("POST")
            .uri("/agent-chat")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "message": "hello" }).to_string(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_query_tool_executes_silently() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![
            tool_response("query_portfolio"),
            text_response("You have 12 properties under management."),
        ])));
        let router = gateway.build_router();

        let response = router
            .oneshot(chat_request(
                serde_json::json!({ "message": "how many properties?" }),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;

        assert_eq!(json["toolsUsed"], serde_json::json!(["query_portfolio"]));
        assert_eq!(json["message"], "You have 12 properties under management.");
        // Query tools are exempt from gating: no pending approval
        assert!(json.get("pendingActions").is_none());
    }

    #[tokio::test]
    async fn test_chat_action_tool_gates_to_pending() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![
            tool_response("send_rent_reminder"),
            text_response("I have prepared a reminder for your approval."),
        ])));

        // Draft level with a permissive threshold so the draft survives
        let mut settings = steward_core::AutonomySettings::for_preset(
            "owner-1",
            steward_core::AutonomyPreset::Balanced,
        );
        settings
            .min_confidence
            .insert(DomainCategory::RentCollection, 0.1);
        gateway.state().store.put_autonomy(&settings).unwrap();

        let router = gateway.build_router();
        let response = router
            .oneshot(chat_request(
                serde_json::json!({ "message": "chase the overdue rent" }),
            ))
            .await
            .unwrap();
        let json = body_json(response).await;

        let pending = json["pendingActions"].as_array().expect("pending actions");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["tool_name"], "send_rent_reminder");
        assert_eq!(pending[0]["category"], "rent_collection");
    }

    #[tokio::test]
    async fn test_chat_remember_tool_writes_preference() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "remember_preference".to_string(),
                    arguments: serde_json::json!({
                        "key": "trades:weekends",
                        "value": "Never book weekend trade callouts",
                        "category": "maintenance",
                    }),
                }],
                tokens_used: 15,
            },
            text_response("Noted; I will avoid weekend callouts."),
        ])));
        let router = gateway.build_router();

        let response = router
            .oneshot(chat_request(
                serde_json::json!({ "message": "remember: no weekend callouts" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let preference = gateway
            .state()
            .store
            .get_preference("owner-1", "trades:weekends")
            .unwrap()
            .expect("preference stored");
        assert_eq!(preference.value, "Never book weekend trade callouts");
    }

    #[tokio::test]
    async fn test_heartbeat_requires_secret() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let config = GatewayConfig {
            scheduler_secret: Some("sweep-secret".to_string()),
            ..GatewayConfig::default()
        };
        let state = GatewayState::new(
            config,
            store,
            Arc::new(HashEmbedder::new()),
            Arc::new(ScriptedLlm::new(vec![])),
            Arc::new(FixtureFeed::new()),
            Arc::new(NoopExecutor),
        );
        let gateway = Gateway::new(state);

        let unauthorized = gateway
            .build_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agent-heartbeat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let authorized = gateway
            .build_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agent-heartbeat")
                    .header("x-steward-scheduler-secret", "sweep-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);

        let json = body_json(authorized).await;
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_learning_roundtrip_over_http() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![])));
        let router = gateway.build_router();

        let request = Request::builder()
            .method("POST")
            .uri("/agent-learning")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "action": "classify_and_learn",
                    "user_id": "owner-1",
                    "error_type": "FACTUAL_ERROR",
                    "tool_name": "query_ledger",
                    "error_message": "Water usage is billed to the tenant for this property",
                    "category": "rent_collection",
                })
                .to_string(),
            ))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["learned"], true);
        assert_eq!(json["artifact_type"], "rule");
    }

    #[tokio::test]
    async fn test_learning_duplicate_feedback_conflicts() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![])));
        let state = gateway.state();

        let decision_id = Uuid::new_v4();
        state
            .store
            .insert_decision(&steward_core::DecisionRecord {
                id: decision_id,
                user_id: "owner-1".into(),
                tool_name: "send_rent_reminder".into(),
                category: DomainCategory::RentCollection,
                input_summary: "reminder".into(),
                confidence_factors: None,
                confidence: None,
                embedding: None,
                owner_feedback: None,
                was_auto_executed: false,
                created_at: steward_core::now(),
            })
            .unwrap();

        let feedback_request = |feedback: &str| {
            Request::builder()
                .method("POST")
                .uri("/agent-learning")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "action": "process_feedback",
                        "user_id": "owner-1",
                        "decision_id": decision_id,
                        "feedback": feedback,
                    })
                    .to_string(),
                ))
                .unwrap()
        };

        let first = gateway
            .build_router()
            .oneshot(feedback_request("approved"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = gateway
            .build_router()
            .oneshot(feedback_request("rejected"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let gateway = test_gateway(Arc::new(ScriptedLlm::new(vec![])));

        let health = gateway
            .build_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let status = gateway
            .build_router()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(status).await;
        assert_eq!(json["model"], "scripted");
    }
}
