//! Contract consumed from the external signing authority.
//!
//! The authority holds the private keys. It exposes an asynchronous
//! handshake and a blocking request call; everything else about it (user
//! prompts, nested round trips, key storage) stays on its side of the trait.

use std::sync::Arc;

/// Callback handed to [`AuthoritySession::connect`]. Being `FnOnce`, it can
/// report at most one outcome.
pub type ConnectCallback = Box<dyn FnOnce(bool) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityRequest {
    PublicKey {
        key_id: String,
    },
    Sign {
        data: Vec<u8>,
        key_id: String,
        flags: u32,
    },
}

impl AuthorityRequest {
    pub fn op(&self) -> &'static str {
        match self {
            AuthorityRequest::PublicKey { .. } => "public_key",
            AuthorityRequest::Sign { .. } => "sign",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityResponse {
    /// OpenSSH public key text, e.g. `ssh-ed25519 AAAA... comment`.
    PublicKey { ssh_public_key: String },
    Signature { signature: Vec<u8> },
}

/// One connection's exclusive handle to the authority.
pub trait AuthoritySession: Send + Sync {
    /// Starts the handshake. `on_result` is invoked once, possibly from
    /// another thread, with whether the session is usable. No deadline is
    /// implied.
    fn connect(&self, on_result: ConnectCallback);

    /// Runs one request to completion. `None` means the authority declined,
    /// failed, or the user cancelled.
    fn execute_api(&self, request: AuthorityRequest) -> Option<AuthorityResponse>;

    /// Releases the session. Called once when the owning bridge run ends.
    fn close(&self) {}
}

/// Opens a fresh session for each bridge run.
pub trait AuthorityProvider: Send + Sync {
    fn open(&self) -> Arc<dyn AuthoritySession>;

    fn authority_kind(&self) -> &'static str {
        "unknown"
    }
}

/// Closes the wrapped session when dropped, so every exit path of a bridge
/// run releases it.
pub(crate) struct SessionGuard {
    session: Arc<dyn AuthoritySession>,
}

impl SessionGuard {
    pub(crate) fn new(session: Arc<dyn AuthoritySession>) -> Self {
        Self { session }
    }

    pub(crate) fn session(&self) -> &Arc<dyn AuthoritySession> {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
    }
}
