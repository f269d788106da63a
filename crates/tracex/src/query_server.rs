use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracex_core::config::Config;
use tracex_core::error::{Result, TracexError};
use tracex_core::query::TracesRequest;
use tracex_store::Store;
use tracex_store::query::QueryOptions;
use tracing::{Instrument, Level};

use crate::protocol::{ApiRequest, ApiResponse};

/// Everything a connection handler needs; cheap to clone per connection.
#[derive(Clone)]
pub struct QueryState {
    pub store: Store,
    pub opts: QueryOptions,
    pub timeout: Duration,
}

impl QueryState {
    pub fn new(store: Store, cfg: &Config) -> Self {
        Self {
            store,
            opts: QueryOptions::from(cfg),
            timeout: cfg.query_timeout,
        }
    }

    /// Runs a store call on the blocking pool, bounded by the query timeout.
    async fn run_blocking<T, F>(&self, kind: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store, &QueryOptions) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let opts = self.opts;
        let span = tracing::info_span!("query", kind);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            f(&store, &opts)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(res)) => res,
            Ok(Err(join)) => Err(TracexError::Internal(format!("query task failed: {join}"))),
            Err(_) => {
                tracing::warn!(kind, timeout = ?self.timeout, "query timed out");
                Err(TracexError::Timeout(
                    humantime::format_duration(self.timeout).to_string(),
                ))
            }
        }
    }

    async fn execute(&self, req: ApiRequest) -> ApiResponse {
        let resp = match req {
            ApiRequest::Traces(r) => self
                .run_blocking("traces", move |store, opts| store.query_traces(&r, opts))
                .await
                .map(ApiResponse::Traces),
            ApiRequest::Status => self
                .run_blocking("status", |store, _| store.status())
                .await
                .map(ApiResponse::Status),
        };

        resp.unwrap_or_else(|e| ApiResponse::Error(e.to_string()))
    }
}

pub async fn run_query_server(
    state: QueryState,
    uds_path: PathBuf,
    tcp_addr: SocketAddr,
) -> anyhow::Result<()> {
    if let Some(parent) = uds_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("create uds parent dir")?;
    }

    if tokio::fs::metadata(&uds_path).await.is_ok() {
        let _ = tokio::fs::remove_file(&uds_path).await;
    }

    let uds_listener = UnixListener::bind(&uds_path).context("bind UDS query listener")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&uds_path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(&uds_path, perms).await?;
    }
    let tcp_listener = TcpListener::bind(tcp_addr)
        .await
        .context("bind TCP query listener")?;

    let uds_task = tokio::spawn(run_uds_loop(uds_listener, state.clone()));
    let tcp_task = tokio::spawn(run_tcp_loop(tcp_listener, state));

    tokio::select! {
        res = uds_task => {
            res??;
        }
        res = tcp_task => {
            res??;
        }
    }

    Ok(())
}

async fn run_uds_loop(listener: UnixListener, state: QueryState) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(BufReader::new(stream), state).await {
                tracing::warn!(error = ?err, "uds client request failed");
            }
        });
    }
}

async fn run_tcp_loop(listener: TcpListener, state: QueryState) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(
            async move {
                if let Err(err) = handle_stream(BufReader::new(stream), state).await {
                    tracing::warn!(error = ?err, "tcp client request failed");
                }
            }
            .instrument(tracing::debug_span!("tcp_client", %peer)),
        );
    }
}

async fn handle_stream<T>(mut stream: BufReader<T>, state: QueryState) -> anyhow::Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<ApiRequest>(&line) {
        Ok(req) => state.execute(req).await,
        Err(err) => ApiResponse::Error(format!("invalid request: {err}")),
    };
    let payload = serde_json::to_vec(&response)?;
    stream.get_mut().write_all(&payload).await?;
    stream.get_mut().write_all(b"\n").await?;
    stream.get_mut().flush().await?;
    Ok(())
}

pub fn router(state: QueryState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/v1/traces", post(http_traces))
        .route("/v1/status", get(http_status))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

pub async fn run_query_http_server(state: QueryState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context("bind HTTP query listener")?;
    axum::serve(listener, router(state))
        .await
        .context("HTTP query server failed")
}

async fn http_traces(State(state): State<QueryState>, Json(req): Json<TracesRequest>) -> Response {
    match state
        .run_blocking("traces", move |store, opts| store.query_traces(&req, opts))
        .await
    {
        Ok(v) => Json(v).into_response(),
        Err(err) => error_response(err),
    }
}

async fn http_status(State(state): State<QueryState>) -> Response {
    match state
        .run_blocking("status", |store, _| store.status())
        .await
    {
        Ok(v) => Json(v).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: TracexError) -> Response {
    let status = match err {
        TracexError::InvalidArgument(_) | TracexError::Parse(_) => StatusCode::BAD_REQUEST,
        TracexError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
