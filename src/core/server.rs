/// MCP Server Transports
///
/// Both transports decode JSON-RPC messages and hand them to the shared
/// `ProtocolHandler`:
/// - STDIO: one JSON message per line on stdin, one response per line on stdout
/// - HTTP: Actix Web server with the MCP endpoint plus health, metrics and
///   SSE tool discovery routes
///
/// All logging goes to stderr so stdout carries nothing but protocol frames.

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer,
    http::header,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::core::auth::RequestContext;
use crate::core::error::codes;
use crate::core::protocol::{MCPResponse, ProtocolHandler};

/// Requests served over HTTP, shared across workers.
#[derive(Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn parse_error(detail: impl std::fmt::Display) -> MCPResponse {
    MCPResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {detail}"))
}

/// Health check endpoint handler.
async fn health(handler: web::Data<ProtocolHandler>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": handler.server_info().name
    }))
}

/// MCP endpoint handler.
///
/// The body is parsed here rather than by an extractor so malformed JSON gets
/// a JSON-RPC parse error instead of a plain 400. A notification is answered
/// with `202 Accepted` and no body.
async fn mcp_handler(
    handler: web::Data<ProtocolHandler>,
    counter: web::Data<RequestCounter>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    counter.increment();

    let message: Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Unparsable HTTP request body");
            return HttpResponse::Ok().json(parse_error(e));
        }
    };

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let ctx = RequestContext::from_authorization(authorization);

    match handler.handle_message(message, &ctx).await {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::Accepted().finish(),
    }
}

/// Request counter and registry size.
async fn metrics_handler(
    handler: web::Data<ProtocolHandler>,
    counter: web::Data<RequestCounter>,
) -> HttpResponse {
    let registry = handler.registry();
    HttpResponse::Ok().json(json!({
        "requests_total": counter.get(),
        "tools_registered": registry.len(),
        "tools_enabled": registry.list_enabled().len(),
        "status": "ok"
    }))
}

/// Server-Sent Events endpoint for tool discovery.
///
/// Sends the enabled tool list, in `tools/list` shape, as a single event.
async fn sse_tools_discovery(handler: web::Data<ProtocolHandler>) -> HttpResponse {
    let tools: Vec<Value> = handler
        .registry()
        .list_enabled()
        .iter()
        .map(|tool| tool.definition())
        .collect();
    let data = json!({
        "count": tools.len(),
        "tools": tools,
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable nginx buffering
        .insert_header(("x-accel-buffering", "no"))
        .body(format!("data: {data}\n\n"))
}

/// Route table shared by the server and the tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/sse", web::get().to(sse_tools_discovery))
        .route("/mcp", web::post().to(mcp_handler))
        .route("/", web::post().to(mcp_handler))
        .route("/", web::get().to(health));
}

/// Run the MCP server in HTTP mode using Actix Web.
///
/// # Arguments
/// * `handler` - Protocol handler shared by every worker
/// * `bind_addr` - `host:port` to listen on
/// * `workers` - Number of worker threads
pub async fn run_server_http(
    handler: Arc<ProtocolHandler>,
    bind_addr: String,
    workers: usize,
) -> std::io::Result<()> {
    let info = handler.server_info().clone();
    tracing::info!(
        name = %info.name,
        version = %info.version,
        bind = %bind_addr,
        workers,
        tools = handler.registry().len(),
        "MCP server starting (HTTP mode)"
    );

    let handler = web::Data::from(handler);
    let counter = web::Data::new(RequestCounter::default());

    HttpServer::new(move || {
        App::new()
            .app_data(handler.clone())
            .app_data(counter.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure_routes)
    })
    .workers(workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads JSON-RPC messages line by line from stdin and writes responses to
/// stdout until stdin is closed.
pub async fn run_server_stdio(handler: Arc<ProtocolHandler>) -> std::io::Result<()> {
    let info = handler.server_info();
    tracing::info!(
        name = %info.name,
        version = %info.version,
        tools = handler.registry().len(),
        "MCP server starting (STDIO mode)"
    );

    let stdin = BufReader::with_capacity(8192, tokio::io::stdin());
    let stdout = BufWriter::with_capacity(8192, tokio::io::stdout());
    serve_lines(&handler, stdin, stdout).await?;

    tracing::info!("STDIO input closed, shutting down");
    Ok(())
}

/// Line-delimited JSON-RPC loop over any reader/writer pair.
///
/// Blank lines are skipped. Responses are flushed one at a time.
pub async fn serve_lines<R, W>(handler: &ProtocolHandler, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ctx = RequestContext::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(message) => handler.handle_message(message, &ctx).await,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable input line");
                Some(parse_error(e))
            }
        };
        let Some(response) = response else {
            continue;
        };

        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                continue;
            }
        };
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}
