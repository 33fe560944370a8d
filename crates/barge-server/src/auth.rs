//! The authorization gate.
//!
//! The server consumes [`AuthZ`] as an interface; deployments plug in
//! their own implementation. [`OpenPolicy`] ships here so a standalone
//! server works out of the box and the 401 path stays testable.

use base64::Engine;

/// The operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    /// Clone, fetch, browse.
    Read,
    /// Push.
    Write,
}

/// HTTP Basic credentials. Never logged.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Redacted so request logging can never leak a password.
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// External authorization interface.
pub trait AuthZ: Send + Sync {
    /// Decides whether `op` on `owner/repo` is allowed for the presented
    /// credentials (if any).
    fn authorize(
        &self,
        owner: &str,
        repo: &str,
        op: GitOp,
        credentials: Option<&Credentials>,
    ) -> Decision;
}

/// Built-in policy: anonymous access per operation, any authenticated
/// caller otherwise.
#[derive(Debug, Clone)]
pub struct OpenPolicy {
    pub anonymous_read: bool,
    pub anonymous_write: bool,
}

impl Default for OpenPolicy {
    fn default() -> Self {
        Self {
            anonymous_read: true,
            anonymous_write: true,
        }
    }
}

impl AuthZ for OpenPolicy {
    fn authorize(
        &self,
        _owner: &str,
        _repo: &str,
        op: GitOp,
        credentials: Option<&Credentials>,
    ) -> Decision {
        let anonymous_ok = match op {
            GitOp::Read => self.anonymous_read,
            GitOp::Write => self.anonymous_write,
        };
        if anonymous_ok || credentials.is_some() {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Parses an `Authorization: Basic …` header value. Malformed headers are
/// treated as absent.
pub fn parse_basic(header: Option<&str>) -> Option<Credentials> {
    let encoded = header?.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}
