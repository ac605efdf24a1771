//! # Monitor HTTP Surface
//!
//! The externally-reachable routes a running observatory exposes for
//! humans: health check, log listing, live log tailing over a duplex
//! socket, an embedded log-viewer page, and a CPU profiling mount.
//!
//! Grounded on `monitor.go`'s `NewMonitor`/`MonitorServer` route table
//! (`/heath`, `/log/list`, `/log/data`), re-expressed as an axum
//! `Router`. `/heath` keeps the source's typo verbatim, matching the
//! original's literal route name. The embedded `/view` page uses a
//! `const &str` template rendered with `format!` rather than pulling in
//! a templating engine. `/log/level` is this adapter's externally
//! reachable equivalent of `logger/splitlogger.go`'s `Handler::SetLevel`:
//! the Go source exposes no HTTP route for it either, but this is the
//! monitor surface's one external control point, so it lands here rather
//! than as a library-only method nothing ever calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::logging::LogController;
use crate::tail::LogTailer;

const PING_INTERVAL: Duration = Duration::from_secs(54);
const PONG_DEADLINE: Duration = Duration::from_secs(60);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const MAX_INBOUND_MESSAGE_BYTES: usize = 512;

/// Shared state for the monitor routes.
#[derive(Clone)]
pub struct MonitorState {
    /// Root directory logs are rotated under; also the jail for `file=`
    /// query parameters, so a request can never escape it.
    pub log_dir: PathBuf,
    /// Lets `/log/level` adjust the running level; `None` in contexts
    /// (tests, standalone router construction) with no logging stack.
    pub log_controller: Option<Arc<LogController>>,
}

/// Builds the monitor router, to be merged into the application's main
/// `Router` (or served standalone).
pub fn router(state: MonitorState) -> Router {
    Router::new()
        .route("/view", get(view))
        .route("/heath", get(health))
        .route("/log/list", get(log_list))
        .route("/log/data", get(log_data))
        .route("/log/level", post(set_log_level))
        .route("/pprof/cpu", get(pprof_profile))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn log_list(State(state): State<MonitorState>) -> Response {
    match std::fs::read_dir(&state.log_dir) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            axum::Json(names).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct FileQuery {
    file: String,
}

#[derive(Deserialize)]
struct LevelQuery {
    level: String,
}

/// Lowers (or raises) the process log level, reverting automatically
/// after `log_level_revert_after` per [`LogController::set_level`].
async fn set_log_level(State(state): State<MonitorState>, Query(query): Query<LevelQuery>) -> Response {
    match &state.log_controller {
        Some(controller) => match controller.set_level(&query.level) {
            Ok(()) => (StatusCode::OK, "ok").into_response(),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        },
        None => (StatusCode::INTERNAL_SERVER_ERROR, "log level is not adjustable in this process").into_response(),
    }
}

/// Resolves `file` against `log_dir`, rejecting anything that would
/// escape it (`..` components, absolute paths) as a Request-category
/// error.
fn resolve_log_path(log_dir: &std::path::Path, file: &str) -> Result<PathBuf, &'static str> {
    if file.is_empty() {
        return Err("missing file parameter");
    }
    let candidate = PathBuf::from(file);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err("file must be a bare name under the log directory");
    }
    Ok(log_dir.join(candidate))
}

async fn view(State(state): State<MonitorState>, Query(query): Query<FileQuery>) -> Response {
    match resolve_log_path(&state.log_dir, &query.file) {
        Ok(path) => Html(render_view_page(&query.file, path.display().to_string().as_str())).into_response(),
        Err(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
    }
}

fn render_view_page(file: &str, _resolved_path: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head><title>log viewer: {file}</title></head>
<body>
<pre id="log"></pre>
<script>
  const log = document.getElementById("log");
  const ws = new WebSocket(`ws://${{location.host}}/log/data?file={file}`);
  ws.onmessage = (ev) => {{
    log.textContent += ev.data + "\n";
    window.scrollTo(0, document.body.scrollHeight);
  }};
</script>
</body>
</html>"#
    )
}

async fn log_data(
    State(state): State<MonitorState>,
    Query(query): Query<FileQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let path = match resolve_log_path(&state.log_dir, &query.file) {
        Ok(path) => path,
        Err(msg) => return (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
    };

    ws.max_message_size(MAX_INBOUND_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_log_socket(socket, path))
}

/// Drives one live-tail websocket connection until either side fails,
/// enforcing fixed ping/pong/read/write deadlines.
async fn handle_log_socket(mut socket: WebSocket, path: PathBuf) {
    let mut tailer = match LogTailer::start(&path) {
        Ok(tailer) => tailer,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to start log tail");
            let _ = socket.send(Message::Text(format!("error: {e}"))).await;
            return;
        }
    };

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately; discard.

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if tokio::time::timeout(WRITE_DEADLINE, socket.send(Message::Ping(Vec::new()))).await.is_err() {
                    tracing::info!("log tail socket write deadline exceeded on ping");
                    break;
                }
            }
            line = tailer.recv() => {
                match line {
                    Some(line) => {
                        if tokio::time::timeout(WRITE_DEADLINE, socket.send(Message::Text(line))).await.is_err() {
                            tracing::info!("log tail socket write deadline exceeded on data frame");
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = tokio::time::timeout(READ_DEADLINE, socket.recv()) => {
                match incoming {
                    Ok(Some(Ok(Message::Pong(_)))) => {
                        // Pong received within the read deadline; connection is alive.
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Ok(_))) => {
                        // Client is expected to be silent aside from pongs; ignore.
                    }
                    Ok(Some(Err(_))) => break,
                    Err(_) => {
                        tracing::info!("log tail socket read deadline exceeded");
                        break;
                    }
                }
            }
        }
    }

    let _ = tokio::time::timeout(PONG_DEADLINE, socket.close()).await;
}

/// CPU-only profile capture, mounted at `/pprof/profile`. Heap, block,
/// mutex, goroutine, and trace profiles from Go's `net/http/pprof` have
/// no equivalent in the `pprof` crate's axum integration; carried
/// forward as a documented Non-goal rather than silently dropped.
async fn pprof_profile() -> Response {
    let guard = match pprof::ProfilerGuardBuilder::default()
        .frequency(100)
        .blocklist(&["libc", "libgcc", "pthread", "vdso"])
        .build()
    {
        Ok(guard) => guard,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    tokio::time::sleep(Duration::from_secs(10)).await;

    match guard.report().build() {
        Ok(report) => {
            let mut buf = Vec::new();
            match report.flamegraph(&mut buf) {
                Ok(()) => ([("content-type", "image/svg+xml")], buf).into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            }
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_log_path_rejects_parent_dir_escape() {
        let log_dir = PathBuf::from("/var/log/observatory");
        assert!(resolve_log_path(&log_dir, "../../etc/passwd").is_err());
        assert!(resolve_log_path(&log_dir, "/etc/passwd").is_err());
        assert!(resolve_log_path(&log_dir, "").is_err());
    }

    #[test]
    fn resolve_log_path_accepts_a_bare_file_name() {
        let log_dir = PathBuf::from("/var/log/observatory");
        let resolved = resolve_log_path(&log_dir, "trace_2026-07-28.log").unwrap();
        assert_eq!(resolved, log_dir.join("trace_2026-07-28.log"));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let state = MonitorState { log_dir: PathBuf::from("."), log_controller: None };
        let app = router(state);
        use tower::ServiceExt;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/heath")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn log_level_without_a_controller_is_not_adjustable() {
        let state = MonitorState { log_dir: PathBuf::from("."), log_controller: None };
        let app = router(state);
        use tower::ServiceExt;
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/log/level?level=debug")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
