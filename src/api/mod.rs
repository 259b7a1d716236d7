use crate::{
    auth::{auth_middleware, create_auth_state},
    config::{ApiConfig, Config},
    error::OrchestratorError,
    models::{AgentId, AgentProfile, AgentStatus, Task, TaskId, TaskStatus},
    monitoring::SystemMonitor,
    orchestrator::{Orchestrator, SystemStats},
    rate_limit::{rate_limit_middleware, RateLimitConfig},
    validation::TaskContentValidator,
    Result,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

const SERVICE_NAME: &str = "conductor";
const SERVICE_VERSION: &str = "0.1.0";

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_BY_ID: &str = "/tasks/{task_id}";
const ROUTE_TASK_CANCEL: &str = "/tasks/{task_id}/cancel";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_AGENT_BY_ID: &str = "/agents/{agent_id}";
const ROUTE_SYSTEM_STATUS: &str = "/system/status";
const ROUTE_SYSTEM_METRICS: &str = "/system/metrics";
const ROUTE_SYSTEM_METRICS_HISTORY: &str = "/system/metrics/history";
const ROUTE_SYSTEM_HEALTH: &str = "/system/health";
const ROUTE_CIRCUIT_BREAKERS: &str = "/circuit-breakers";

const ERROR_INTERNAL_SERVER: &str = "internal server error";
const ERROR_AGENT_NOT_FOUND: &str = "agent not found";
const ERROR_INVALID_CONTENT: &str = "invalid task content";
const ERROR_INVALID_CONTEXT_KEY: &str = "invalid metadata key";
const ERROR_INVALID_CONTEXT_VALUE: &str = "invalid metadata value";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    orchestrator: Arc<Orchestrator>,
    validator: Arc<TaskContentValidator>,
    rate_limiter: Arc<RateLimitConfig>,
    system_monitor: Option<Arc<SystemMonitor>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    pub description: String,
    pub priority: Option<u8>,
    pub dependencies: Option<Vec<TaskId>>,
    pub required_capabilities: Option<Vec<String>>,
    pub max_retries: Option<u32>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: TaskId,
    pub task_type: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub assigned_agent: Option<AgentId>,
    pub progress: u8,
    pub retry_count: u32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            description: task.description,
            status: task.status,
            priority: task.priority,
            assigned_agent: task.assigned_agent,
            progress: task.progress,
            retry_count: task.retry_count,
            created_at: task.created_at.to_rfc3339(),
            started_at: task.started_at.map(|t| t.to_rfc3339()),
            ended_at: task.ended_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub cascade: bool,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_type: String,
    pub capabilities: Option<Vec<String>>,
    pub priority: Option<u8>,
    pub max_concurrent_tasks: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterAgentResponse {
    pub agent_id: AgentId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub priority: u8,
    pub status: AgentStatus,
    pub current_task_count: u32,
    pub max_concurrent_tasks: u32,
    pub avg_task_duration_ms: f64,
}

impl From<AgentProfile> for AgentResponse {
    fn from(agent: AgentProfile) -> Self {
        Self {
            id: agent.id,
            agent_type: agent.agent_type,
            capabilities: agent.capabilities.into_iter().collect(),
            priority: agent.priority,
            status: agent.status,
            current_task_count: agent.current_task_count,
            max_concurrent_tasks: agent.max_concurrent_tasks,
            avg_task_duration_ms: agent.avg_task_duration_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn orchestrator_error_response(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::ConflictState(_) => StatusCode::CONFLICT,
        OrchestratorError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::CapacityExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::DeliveryFailure(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Serialization(_) | OrchestratorError::ConfigurationError(_) | OrchestratorError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let details = if status == StatusCode::INTERNAL_SERVER_ERROR {
        None
    } else {
        Some(err.to_string())
    };
    (
        status,
        Json(ErrorResponse {
            error: if status == StatusCode::INTERNAL_SERVER_ERROR {
                ERROR_INTERNAL_SERVER.to_string()
            } else {
                err.to_string()
            },
            details,
        }),
    )
}

impl ApiServer {
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let validator = Arc::new(TaskContentValidator::new()?);
        let rate_limiter = Arc::new(RateLimitConfig::new());
        Ok(Self {
            config: config.api,
            orchestrator,
            validator,
            rate_limiter,
            system_monitor: None,
        })
    }

    pub fn with_system_monitor(mut self, monitor: Arc<SystemMonitor>) -> Self {
        self.system_monitor = Some(monitor);
        self
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| OrchestratorError::Internal(e.into()))?;

        info!(host = %self.config.host, port = self.config.port, "api server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .map_err(|e| OrchestratorError::Internal(e.into()))?;

        Ok(())
    }

    /// Builds the router with middleware ordered rate-limit -> auth ->
    /// trace -> CORS, matching how every HTTP surface in this codebase
    /// is assembled.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TASKS, post(create_task))
            .route(ROUTE_TASK_BY_ID, get(get_task))
            .route(ROUTE_TASK_CANCEL, post(cancel_task))
            .route(ROUTE_AGENTS, get(list_agents).post(register_agent))
            .route(ROUTE_AGENT_BY_ID, get(get_agent))
            .route(ROUTE_SYSTEM_STATUS, get(get_system_status))
            .route(ROUTE_SYSTEM_METRICS, get(get_system_metrics))
            .route(ROUTE_SYSTEM_METRICS_HISTORY, get(get_metrics_history))
            .route(ROUTE_SYSTEM_HEALTH, get(get_system_health))
            .route(ROUTE_CIRCUIT_BREAKERS, get(get_circuit_breaker_status))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(
                        self.rate_limiter.clone(),
                        rate_limit_middleware,
                    ))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn create_task(
    State(server): State<ApiServer>,
    Json(request): Json<CreateTaskRequest>,
) -> std::result::Result<(StatusCode, Json<CreateTaskResponse>), (StatusCode, Json<ErrorResponse>)> {
    let sanitized_description = match server.validator.validate_and_sanitize_task_content(&request.description) {
        Ok(content) => content,
        Err(_) => {
            warn!(
                description = &request.description[..std::cmp::min(100, request.description.len())],
                "task content validation failed"
            );
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: ERROR_INVALID_CONTENT.to_string(),
                    details: None,
                }),
            ));
        }
    };

    let priority = request.priority.unwrap_or(5);
    let mut task = Task::new(request.task_type, sanitized_description, priority);

    if let Some(deps) = request.dependencies {
        task = task.with_dependencies(deps);
    }
    if let Some(caps) = request.required_capabilities {
        task = task.with_capabilities(caps);
    }
    if let Some(max_retries) = request.max_retries {
        task = task.with_max_retries(max_retries);
    }

    if let Some(metadata) = request.metadata {
        for (key, value) in metadata {
            if server.validator.validate_context_key(&key).is_err() {
                warn!(key = %key, "invalid task metadata key");
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: ERROR_INVALID_CONTEXT_KEY.to_string(),
                        details: None,
                    }),
                ));
            }
            let sanitized_value = match server.validator.validate_and_sanitize_context_value(&value) {
                Ok(v) => v,
                Err(_) => {
                    warn!(key = %key, "invalid task metadata value");
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(ErrorResponse {
                            error: ERROR_INVALID_CONTEXT_VALUE.to_string(),
                            details: None,
                        }),
                    ));
                }
            };
            task.metadata.insert(key, sanitized_value);
        }
    }

    match server.orchestrator.submit_task(task).await {
        Ok(task_id) => {
            info!(task_id = %task_id, "task submitted");
            Ok((
                StatusCode::CREATED,
                Json(CreateTaskResponse {
                    task_id,
                    status: TaskStatus::Pending,
                }),
            ))
        }
        Err(e) => {
            warn!(error = %e, "task submission failed");
            Err(orchestrator_error_response(e))
        }
    }
}

async fn get_task(
    State(server): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> std::result::Result<Json<TaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    server
        .orchestrator
        .get_task(&task_id)
        .await
        .map(|task| Json(task.into()))
        .map_err(orchestrator_error_response)
}

async fn cancel_task(
    State(server): State<ApiServer>,
    Path(task_id): Path<TaskId>,
    Json(request): Json<CancelTaskRequest>,
) -> std::result::Result<Json<Vec<TaskId>>, (StatusCode, Json<ErrorResponse>)> {
    server
        .orchestrator
        .engine
        .cancel(
            &task_id,
            request.reason.unwrap_or_else(|| "cancelled via API".to_string()),
            request.cascade,
            request.force,
        )
        .await
        .map(Json)
        .map_err(orchestrator_error_response)
}

async fn register_agent(
    State(server): State<ApiServer>,
    Json(request): Json<RegisterAgentRequest>,
) -> Json<RegisterAgentResponse> {
    let mut agent = AgentProfile::new(request.agent_type, request.max_concurrent_tasks);
    if let Some(caps) = request.capabilities {
        agent = agent.with_capabilities(caps);
    }
    if let Some(priority) = request.priority {
        agent = agent.with_priority(priority);
    }
    let agent_id = agent.id.clone();
    server.orchestrator.register_agent(agent).await;
    Json(RegisterAgentResponse { agent_id })
}

async fn get_agent(
    State(server): State<ApiServer>,
    Path(agent_id): Path<AgentId>,
) -> std::result::Result<Json<AgentResponse>, (StatusCode, Json<ErrorResponse>)> {
    match server.orchestrator.engine.get_agent(&agent_id).await {
        Some(agent) => Ok(Json(agent.into())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: ERROR_AGENT_NOT_FOUND.to_string(),
                details: Some(format!("agent id: {agent_id}")),
            }),
        )),
    }
}

async fn list_agents(State(server): State<ApiServer>) -> Json<Vec<AgentResponse>> {
    let agents = server.orchestrator.engine.list_agents().await;
    Json(agents.into_iter().map(AgentResponse::from).collect())
}

async fn get_system_status(State(server): State<ApiServer>) -> Json<SystemStats> {
    Json(server.orchestrator.stats().await)
}

async fn get_system_metrics(
    State(server): State<ApiServer>,
) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    match &server.system_monitor {
        Some(monitor) => match monitor.current().await {
            Some(metrics) => serde_json::to_value(metrics)
                .map(Json)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
            None => Err(StatusCode::SERVICE_UNAVAILABLE),
        },
        None => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn get_metrics_history(
    State(server): State<ApiServer>,
) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    match &server.system_monitor {
        Some(monitor) => {
            let history = monitor.history().await;
            Ok(Json(serde_json::json!({
                "metrics_count": history.len(),
                "metrics": history,
            })))
        }
        None => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn get_system_health(State(server): State<ApiServer>) -> Json<serde_json::Value> {
    match &server.system_monitor {
        Some(monitor) => match monitor.current().await {
            Some(metrics) => Json(serde_json::json!({
                "status": metrics.health_status,
                "service": SERVICE_NAME,
                "version": SERVICE_VERSION,
            })),
            None => Json(serde_json::json!({
                "status": "unknown",
                "service": SERVICE_NAME,
                "version": SERVICE_VERSION,
            })),
        },
        None => Json(serde_json::json!({
            "status": "unknown",
            "service": SERVICE_NAME,
            "version": SERVICE_VERSION,
            "error": "monitoring not configured",
        })),
    }
}

async fn get_circuit_breaker_status(
    State(server): State<ApiServer>,
) -> Json<serde_json::Value> {
    let circuits = server.orchestrator.engine.circuits.all_metrics().await;
    Json(serde_json::json!({ "circuit_breakers": circuits }))
}
