//! glowd - networked lamp controller firmware
//!
//! Serves a browser-facing configuration endpoint over HTTP, answers
//! captive-portal DNS probes, and keeps settings synchronized with the
//! auxiliary lamp controller over a slow half-duplex serial link. All of
//! it runs single-threaded on one readiness-driven dispatch loop.

pub mod app;
pub mod config;
pub mod dns;
pub mod http;
pub mod reactor;
pub mod serial;
pub mod server;
pub mod settings;
