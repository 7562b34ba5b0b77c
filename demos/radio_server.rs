//! Radio server example
//!
//! Run with: cargo run --example radio_server [BIND_ADDR]
//!
//! Serves the broadcast over HTTP with axum:
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /stream` | Live `audio/mpeg` stream of whatever is on air |
//! | `POST /controller` | Body is a command: `start`, `stop` or an effect name |
//!
//! Examples:
//!   curl -N http://localhost:3000/stream > out.mp3
//!   curl -d start http://localhost:3000/controller
//!   curl -d applause http://localhost:3000/controller
//!
//! Needs `sox` on the PATH, `audio/songs/conversation.mp3` and effect clips
//! in `audio/fx/` relative to the working directory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use livecast::{CommandOutcome, EngineConfig, ListenerId, ListenerStream, StreamingEngine};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Unregisters a listener once its HTTP body is dropped
struct Connection {
    engine: Arc<StreamingEngine>,
    id: ListenerId,
    stream: ListenerStream,
}

impl Drop for Connection {
    fn drop(&mut self) {
        let engine = self.engine.clone();
        let id = self.id;
        tokio::spawn(async move { engine.unregister_listener(id).await });
    }
}

/// Handles `GET /stream`
async fn handle_stream(State(engine): State<Arc<StreamingEngine>>) -> Response {
    let (id, stream) = engine.register_listener().await;
    let connection = Connection { engine, id, stream };

    let chunks = futures::stream::unfold(connection, |mut connection| async move {
        let chunk = connection.stream.recv().await?;
        Some((Ok::<_, std::io::Error>(chunk), connection))
    });

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::ACCEPT_RANGES, "bytes"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// Handles `POST /controller`
async fn handle_command(State(engine): State<Arc<StreamingEngine>>, body: String) -> (StatusCode, String) {
    match engine.handle_command(&body).await {
        Ok(CommandOutcome::Ok) => (StatusCode::OK, "ok".into()),
        Ok(CommandOutcome::Ignored) => (StatusCode::OK, "ignored".into()),
        Err(e) => {
            tracing::warn!(error = %e, "Command failed");
            (StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// Log delivery counters and state changes until the process exits
fn spawn_reporter(engine: Arc<StreamingEngine>) {
    let mut states = engine.watch_state();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    tracing::info!(state = ?state, "Session state changed");
                }
                _ = ticker.tick() => {
                    let stats = engine.stats();
                    let listeners = engine.listeners().await.len();
                    tracing::info!(
                        listeners = listeners,
                        chunks = stats.chunks,
                        pruned = stats.pruned,
                        bitrate = stats.bitrate(),
                        "Broadcast stats"
                    );
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string())
        .replace("localhost", "127.0.0.1")
        .parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livecast=info".parse()?)
                .add_directive("radio_server=debug".parse()?),
        )
        .init();

    let engine = Arc::new(StreamingEngine::new(EngineConfig::default()));
    spawn_reporter(engine.clone());

    let app = Router::new()
        .route("/stream", get(handle_stream))
        .route("/controller", post(handle_command))
        .with_state(engine.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;

    println!("Radio server on http://{}", addr);
    println!("  listen:  curl -N http://{}/stream > out.mp3", addr);
    println!("  control: curl -d start http://{}/controller", addr);

    // Open streams never end on their own, so shut down on ctrl-c directly
    tokio::select! {
        served = axum::serve(listener, app) => served?,
        _ = tokio::signal::ctrl_c() => println!("Shutting down"),
    }

    engine.stop().await;
    Ok(())
}
