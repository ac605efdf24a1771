//! obs-server - the HTTP adapter around the latency observatory core.
//!
//! Wires `obs_engine::Observatory` into an axum application: the
//! [`interceptor::request_interceptor`] middleware times and traces
//! every request, and [`monitor::router`] exposes the health, log
//! listing, live log tail, and profiling surface. [`logging`] owns the
//! structured JSON log sink and its rotation/compression background
//! task; [`tail`] follows a single log file for `monitor`'s websocket
//! route.

pub mod interceptor;
pub mod logging;
pub mod monitor;
pub mod tail;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use obs_common::ObservatoryConfig;
use obs_engine::Observatory;

use crate::logging::LogController;

/// Assembles the full application router: the monitor surface, with the
/// request interceptor layered over it so its own routes are timed and
/// traced like any other handler.
pub fn build_router(observatory: Arc<Observatory>, log_controller: Option<Arc<LogController>>) -> Router {
    let monitor_state = monitor::MonitorState {
        log_dir: observatory.config().log_dir.clone(),
        log_controller,
    };

    monitor::router(monitor_state).layer(axum::middleware::from_fn_with_state(
        observatory,
        interceptor::request_interceptor,
    ))
}

/// Convenience bundle for wiring an observatory-backed server from a
/// single config, the shape `main.rs` constructs at startup.
pub struct ObservatoryServer {
    pub observatory: Arc<Observatory>,
    pub log_dir: PathBuf,
    pub log_controller: Option<Arc<LogController>>,
}

impl ObservatoryServer {
    pub fn new(config: ObservatoryConfig) -> Self {
        let log_dir = config.log_dir.clone();
        ObservatoryServer {
            observatory: Arc::new(Observatory::new(config)),
            log_dir,
            log_controller: None,
        }
    }

    /// Attaches a [`LogController`] so the monitor surface's `/log/level`
    /// route can adjust the running process's log level.
    pub fn with_log_controller(mut self, controller: Arc<LogController>) -> Self {
        self.log_controller = Some(controller);
        self
    }

    pub fn router(&self) -> Router {
        build_router(self.observatory.clone(), self.log_controller.clone())
    }
}
