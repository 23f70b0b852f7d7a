//! HTTP API surface
//!
//! Provides:
//! - SSE streaming for chat turns
//! - Chat listing and history endpoints
//! - Sub-agent management endpoints
//! - Bearer-token identity resolution

pub mod identity;
pub mod server;

pub use identity::{IdentityProvider, StaticTokenIdentity};
pub use server::{ApiServer, ApiServerConfig};
