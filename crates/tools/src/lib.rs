//! Capability dispatcher for Ava.
//!
//! Structured ancillary actions (HTTP fetch, code execution, network probe,
//! device commands, text extraction) with input validation and bounded
//! resource usage.

pub mod code_exec;
pub mod device;
pub mod dispatcher;
pub mod http_fetch;
pub mod network_probe;
pub mod output;
pub mod text_extract;

pub use device::{DeviceBackend, LocalDevice};
pub use dispatcher::Dispatcher;
