//! mcp-agent Web 服务：SSE 流式任务进度、同步任务接口、单次问答与流式问答（带广告注入）
//!
//! 启用方式：`cargo run --bin mcp-agent-web --features web`

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Redirect, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use mcp_agent::ads::{integrate_ads, AdRelay, AdRelayClient, StreamingAdSession};
use mcp_agent::config::{load_config, ServerSection};
use mcp_agent::core::{AgentBuilder, EventProjector, RunDeps, UpdateEvent};
use mcp_agent::llm::{LlmClient, Message, TokenStream};
use mcp_agent::observability;
use mcp_agent::run_agent_task;
use mcp_agent::tools::CapabilityProvider;

const DEFAULT_QUERY_TEMPERATURE: f32 = 0.7;

struct AppState {
    builder: AgentBuilder,
    capabilities: Arc<dyn CapabilityProvider>,
    relay: Arc<AdRelayClient>,
}

impl AppState {
    fn run_deps(&self) -> Result<RunDeps, (StatusCode, Json<ErrorBody>)> {
        self.builder
            .run_deps(Arc::clone(&self.capabilities))
            .map_err(|e| internal_error(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct McpRequest {
    task: String,
    #[serde(default, alias = "threadId")]
    thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct McpResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<FinalResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct FinalResponse {
    final_response: String,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    prompt: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// /query/stream 每个事件的负载
#[derive(Debug, Serialize)]
struct StreamChunk {
    status: &'static str,
    chunk: String,
    full_response: String,
    is_final: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    is_final: bool,
}

fn error_body(error: impl Into<String>) -> ErrorBody {
    ErrorBody {
        status: "error",
        error: error.into(),
        is_final: true,
    }
}

fn internal_error(error: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body(error)))
}

fn error_event(error: impl Into<String>) -> Event {
    Event::default()
        .event("error")
        .json_data(error_body(error))
        .unwrap_or_else(|_| Event::default().event("error").data("{\"status\":\"error\",\"is_final\":true}"))
}

fn update_event(update: &UpdateEvent) -> Event {
    Event::default()
        .event("update")
        .json_data(update)
        .unwrap_or_else(|e| error_event(e.to_string()))
}

fn sse<S>(events: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

fn cors_layer(server: &ServerSection) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if server.allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None).context("Failed to load config")?;
    config
        .require_api_key()
        .context("GOOGLE_API_KEY is required to start the server")?;
    let server = config.server.clone();
    let builder = AgentBuilder::new(config);
    let capabilities = builder
        .build_capabilities()
        .context("Failed to load capability servers")?;
    let relay = Arc::new(builder.build_ad_relay());

    let state = Arc::new(AppState {
        builder,
        capabilities,
        relay,
    });

    let api = Router::new()
        .route("/", get(index_redirect))
        .route("/mcp", post(api_mcp_stream))
        .route("/mcp/sync", post(api_mcp_sync))
        .route("/query", post(api_query))
        .route("/query/stream", post(api_query_stream));

    let app = Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .route("/static/index.html", get(index_page))
        .layer(cors_layer(&server))
        .with_state(state);

    let addr = format!("{}:{}", server.host, server.port);
    tracing::info!("mcp-agent web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index_redirect() -> Redirect {
    Redirect::temporary("/static/index.html")
}

async fn index_page() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// POST /api/v1/mcp：运行任务，以 SSE `update` 事件推送进度
async fn api_mcp_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<McpRequest>,
) -> Response {
    let deps = match state.run_deps() {
        Ok(deps) => deps,
        Err((_, Json(body))) => {
            tracing::error!(error = %body.error, "cannot start run");
            let failed = stream::once(async move { Ok::<_, Infallible>(error_event(body.error)) });
            return sse(failed).into_response();
        }
    };
    tracing::info!(thread_id = ?req.thread_id, "mcp task received");

    let mut projector = EventProjector::new();
    let events = run_agent_task(&req.task, req.thread_id, deps).filter_map(move |snapshot| {
        let event = projector
            .project(&snapshot)
            .map(|update| Ok::<_, Infallible>(update_event(&update)));
        async move { event }
    });
    sse(events).into_response()
}

/// POST /api/v1/mcp/sync：运行任务直到结束，返回最终回复
async fn api_mcp_sync(
    State(state): State<Arc<AppState>>,
    Json(req): Json<McpRequest>,
) -> Result<Json<McpResponse>, (StatusCode, Json<ErrorBody>)> {
    let deps = state.run_deps()?;
    let last = run_agent_task(&req.task, req.thread_id, deps)
        .fold(None, |_, snapshot| async move { Some(snapshot) })
        .await;

    let Some(snapshot) = last else {
        return Err(internal_error("run produced no snapshots"));
    };
    let response = match snapshot.state.error {
        Some(error) => McpResponse {
            status: "error",
            result: None,
            error: Some(error),
        },
        None => McpResponse {
            status: "success",
            result: Some(FinalResponse {
                final_response: snapshot.state.final_result.unwrap_or_default(),
            }),
            error: None,
        },
    };
    Ok(Json(response))
}

fn build_query_llm(state: &AppState, req: &QueryRequest) -> Result<Arc<dyn LlmClient>, String> {
    state
        .builder
        .build_llm(req.model.as_deref(), Some(req.temperature.unwrap_or(DEFAULT_QUERY_TEMPERATURE)))
        .map_err(|e| e.to_string())
}

/// POST /api/v1/query：单次补全 + 一次非流式广告整合
async fn api_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, Json<QueryResponse>)> {
    let fail = |error: String| {
        tracing::warn!(error = %error, "query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(QueryResponse {
                status: "error",
                response: None,
                error: Some(error),
            }),
        )
    };
    let llm = build_query_llm(&state, &req).map_err(fail)?;
    let answer = llm.complete(&[Message::user(&req.prompt)]).await.map_err(fail)?;
    let response = integrate_ads(&state.relay, &answer).await;
    Ok(Json(QueryResponse {
        status: "success",
        response: Some(response),
        error: None,
    }))
}

/// 流式问答的拉取状态；session 随流一起被丢弃时由其 Drop 补发 finalize
struct QueryStream {
    tokens: TokenStream,
    session: StreamingAdSession,
    full_response: String,
    done: bool,
}

impl QueryStream {
    async fn next_event(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        match self.tokens.next().await {
            Some(Ok(token)) => {
                let chunk = self.session.process_chunk(&token).await;
                self.full_response.push_str(&chunk);
                Some(chunk_event(StreamChunk {
                    status: "streaming",
                    chunk,
                    full_response: self.full_response.clone(),
                    is_final: false,
                }))
            }
            Some(Err(e)) => {
                self.done = true;
                self.session.finalize().await;
                tracing::warn!(error = %e, "completion stream failed");
                Some(error_event(e))
            }
            None => {
                self.done = true;
                self.session.finalize().await;
                Some(chunk_event(StreamChunk {
                    status: "success",
                    chunk: String::new(),
                    full_response: self.full_response.clone(),
                    is_final: true,
                }))
            }
        }
    }
}

fn chunk_event(chunk: StreamChunk) -> Event {
    Event::default()
        .json_data(chunk)
        .unwrap_or_else(|e| error_event(e.to_string()))
}

/// POST /api/v1/query/stream：流式补全，每个片段经过流式广告会话
async fn api_query_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Response {
    let tokens = match build_query_llm(&state, &req) {
        Ok(llm) => llm.complete_stream(&[Message::user(&req.prompt)]).await,
        Err(e) => Err(e),
    };
    let tokens = match tokens {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(error = %e, "query stream failed to start");
            return sse(stream::once(async move { Ok::<_, Infallible>(error_event(e)) })).into_response();
        }
    };

    let relay: Arc<dyn AdRelay> = state.relay.clone();
    let mut session = StreamingAdSession::new(relay);
    session.initialize().await;

    let run = QueryStream {
        tokens,
        session,
        full_response: String::new(),
        done: false,
    };
    let events = stream::unfold(run, |mut run| async move {
        let event = run.next_event().await?;
        Some((Ok::<_, Infallible>(event), run))
    });
    sse(events).into_response()
}
