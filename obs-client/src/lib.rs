//! # Monitor Client
//!
//! A thin async client for an observatory's monitor HTTP surface: health
//! checks, log listing, and live log tailing over WebSocket. Used by
//! `obs-server`'s integration tests and anything else that wants to
//! watch a running observatory from outside the process.

mod client;

pub use client::{ClientError, ClientResult, LogTailStream, MonitorClient};
