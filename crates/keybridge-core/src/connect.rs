use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::authority::AuthoritySession;
use crate::{BridgeError, Result};

/// Turns the session's callback-driven handshake into an awaitable result.
///
/// The oneshot sender is the single outcome slot: it moves into the
/// callback and is consumed by the one `send`. If the authority drops the
/// callback without calling it, the receiver resolves with an error instead
/// of hanging.
pub async fn connect_session(
    session: &dyn AuthoritySession,
    timeout: Option<Duration>,
) -> Result<()> {
    let (tx, rx) = oneshot::channel::<bool>();
    session.connect(Box::new(move |ok: bool| {
        let _ = tx.send(ok);
    }));

    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, rx)
            .await
            .map_err(|_| BridgeError::ConnectTimeout(limit))?,
        None => rx.await,
    };

    match outcome {
        Ok(true) => {
            debug!("authority connected");
            Ok(())
        }
        Ok(false) => Err(BridgeError::ConnectFailed),
        Err(_) => Err(BridgeError::ConnectAbandoned),
    }
}
