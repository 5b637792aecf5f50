pub mod capability;
pub mod config;
pub mod error;
pub mod intent;
pub mod provider;
pub mod session;
pub mod trace;
pub mod turn;

pub use error::{Error, ErrorKind, ProviderFailureKind, Result};
