use crate::mirror::Mirror;
use crate::record::DownloadRecord;
use crate::status::StatusSummary;
use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{Stream, StreamExt};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Level, info};

pub fn create_app(mirror: Mirror) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/downloads", get(list_downloads))
        .route("/events", get(sse_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(mirror)
}

/// Serves the status surface on `http_port` until the listener fails.
pub async fn serve(mirror: Mirror) -> io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], mirror.settings.http_port));
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, mirror).await
}

pub async fn serve_on(listener: TcpListener, mirror: Mirror) -> io::Result<()> {
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_app(mirror)).await
}

async fn status(State(mirror): State<Mirror>) -> Json<StatusSummary> {
    Json(mirror.current_summary().await)
}

async fn list_downloads(State(mirror): State<Mirror>) -> Json<Vec<DownloadRecord>> {
    Json(mirror.records())
}

async fn sse_handler(
    State(mirror): State<Mirror>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = mirror.tx.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(msg) => Ok(Event::default().data(msg)),
        Err(_) => Ok(Event::default().comment("keepalive")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
