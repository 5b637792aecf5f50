//! Ava gateway: HTTP and WebSocket transport, session orchestration, and
//! the wiring that boots the service.

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod cli;
pub mod events;
pub mod runtime;
pub mod state;
