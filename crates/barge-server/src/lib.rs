//! Barge server: Git Smart HTTP over bare repositories.
//!
//! Request flow: router → auth gate → per-repository actor → protocol
//! engine or browse queries → git layer → byte store.

pub mod actor;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod router;

pub use actor::{RepoActor, RepoRegistry};
pub use auth::{AuthZ, Credentials, Decision, GitOp, OpenPolicy};
pub use cache::{CacheConfig, ResultCache};
pub use config::ServerConfig;
pub use error::ServerError;
pub use router::{create_router, AppState};
