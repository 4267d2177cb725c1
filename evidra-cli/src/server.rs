//! HTTP server streaming research runs as server-sent events, built on axum.
//!
//! `POST /v1/research` takes a `Question` JSON body and answers with one SSE
//! event per `ResearchEvent`, named after the event's tag. The run is
//! cancelled when the client disconnects.

use axum::{
    Json, Router,
    extract::State,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use evidra_core::Question;
use evidra_core::research::{ResearchEngine, ResearchEvent};
use futures::Stream;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared engine reference for axum handlers.
pub type SharedEngine = Arc<ResearchEngine>;

/// Build an axum Router with `/v1/research` and `/health` routes.
pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/v1/research", post(research_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

async fn research_handler(
    State(engine): State<SharedEngine>,
    Json(question): Json<Question>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ResearchEvent>();
    let cancel = CancellationToken::new();

    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        // The outcome is already in the stream as events.
        let _ = engine.run(&question, &tx, &run_cancel).await;
    });

    // Dropping the stream (client gone) drops the guard and cancels the run.
    let guard = cancel.drop_guard();
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Event::default().event(event.name()).json_data(&event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health_handler(State(engine): State<SharedEngine>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "model": engine.brain().model_name(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    axum::Json(body)
}

/// Serve until the process is stopped.
pub async fn run(engine: SharedEngine, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(engine);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Evidra server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
