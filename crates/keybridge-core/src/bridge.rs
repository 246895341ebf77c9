//! Per-connection bridge between an agent protocol client and the authority.
//!
//! A run moves through these states:
//!
//! ```text
//! INIT ──► CONNECTING ──► READY ⇄ PROCESSING ──► CLOSED
//!              │                                  ▲
//!              └──────────── connect failed ──────┘
//! ```
//!
//! Any I/O, framing or payload error also ends in CLOSED. Requests are
//! served strictly one at a time: a response is written before the next
//! frame is read, so the authority never sees two concurrent requests from
//! the same connection.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use keybridge_proto::{
    read_frame, write_frame, AgentMessage, IdentitiesAnswer, MessageType, ProtoError, SignRequest,
    SignResponse,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::authority::{
    AuthorityProvider, AuthorityRequest, AuthorityResponse, AuthoritySession, SessionGuard,
};
use crate::config::Timeouts;
use crate::connect::connect_session;
use crate::public_key::key_blob_from_text;
use crate::{BridgeError, Result};

/// Services the bridge needs from whoever launched it.
pub trait BridgeHost: Send + Sync {
    /// Key identifier for authority requests, empty if unset.
    fn key_id(&self) -> String;

    /// Surfaces an error to the user. Only called when the authority
    /// handshake fails.
    fn report_error(&self, port: u16, err: &BridgeError);

    /// Called exactly once when the worker for `port` has finished.
    fn worker_exited(&self, port: u16);
}

#[derive(Clone)]
pub struct Bridge {
    provider: Arc<dyn AuthorityProvider>,
    timeouts: Timeouts,
}

impl Bridge {
    pub fn new(provider: Arc<dyn AuthorityProvider>, timeouts: Timeouts) -> Self {
        Self { provider, timeouts }
    }

    /// Connects to the agent socket forwarded to `127.0.0.1:port` and serves
    /// it until the client disconnects or the connection fails.
    pub async fn run(&self, port: u16, host: &dyn BridgeHost) {
        match self.run_connection(port, host).await {
            Ok(()) => info!(port, "agent connection finished"),
            Err(err) => warn!(port, ?err, "agent connection aborted"),
        }
        host.worker_exited(port);
    }

    async fn run_connection(&self, port: u16, host: &dyn BridgeHost) -> Result<()> {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
        let key_id = host.key_id();
        let guard = SessionGuard::new(self.provider.open());
        debug!(port, authority = self.provider.authority_kind(), "opened authority session");

        let result = self.drive(&mut stream, guard.session(), &key_id, port, host).await;
        if result.is_err() {
            abort(&stream);
        }
        result
    }

    async fn drive(
        &self,
        stream: &mut TcpStream,
        session: &Arc<dyn AuthoritySession>,
        key_id: &str,
        port: u16,
        host: &dyn BridgeHost,
    ) -> Result<()> {
        if let Err(err) = connect_session(session.as_ref(), self.timeouts.connect).await {
            host.report_error(port, &err);
            return Err(err);
        }
        let (mut reader, mut writer) = stream.split();
        self.serve(&mut reader, &mut writer, session, key_id).await
    }

    /// Request loop over an already connected session.
    ///
    /// Returns `Ok(())` when the client closes the stream between frames.
    pub async fn serve<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        session: &Arc<dyn AuthoritySession>,
        key_id: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let Some(request) = read_frame(reader).await? else {
                debug!("client closed agent stream");
                return Ok(());
            };
            let response = self.dispatch(session, key_id, request).await?;
            write_frame(writer, &response).await?;
        }
    }

    async fn dispatch(
        &self,
        session: &Arc<dyn AuthoritySession>,
        key_id: &str,
        request: AgentMessage,
    ) -> Result<AgentMessage> {
        match request.kind() {
            Some(MessageType::RequestIdentities) => {
                let call = AuthorityRequest::PublicKey {
                    key_id: key_id.to_owned(),
                };
                let response = match self.call(session, call).await? {
                    Some(AuthorityResponse::PublicKey { ssh_public_key }) => {
                        identities_answer(&ssh_public_key)
                    }
                    Some(other) => mismatched("public_key", &other),
                    None => AgentMessage::failure(),
                };
                Ok(response)
            }
            Some(MessageType::SignRequest) => {
                let contents = request
                    .contents()
                    .ok_or(ProtoError::InvalidMessage("sign request without contents"))?;
                let sign = SignRequest::decode(contents)?;
                debug!(data_len = sign.data.len(), flags = sign.flags, "sign request");
                let call = AuthorityRequest::Sign {
                    data: sign.data,
                    key_id: key_id.to_owned(),
                    flags: sign.flags,
                };
                let response = match self.call(session, call).await? {
                    Some(AuthorityResponse::Signature { signature }) => AgentMessage::with_contents(
                        MessageType::SignResponse,
                        SignResponse::new(signature).encode(),
                    ),
                    Some(other) => mismatched("sign", &other),
                    None => AgentMessage::failure(),
                };
                Ok(response)
            }
            _ => {
                debug!(message_type = request.message_type(), "unsupported request type");
                Ok(AgentMessage::failure())
            }
        }
    }

    /// Runs a blocking authority call off the async worker and waits for it.
    async fn call(
        &self,
        session: &Arc<dyn AuthoritySession>,
        request: AuthorityRequest,
    ) -> Result<Option<AuthorityResponse>> {
        let op = request.op();
        let session = Arc::clone(session);
        let task = tokio::task::spawn_blocking(move || session.execute_api(request));
        let joined = match self.timeouts.request {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| BridgeError::RequestTimeout(limit))?,
            None => task.await,
        };
        match joined {
            Ok(Some(response)) => Ok(Some(response)),
            Ok(None) => {
                debug!(op, "authority declined request");
                Ok(None)
            }
            Err(err) => {
                warn!(?err, op, "authority worker failed");
                Ok(None)
            }
        }
    }
}

fn identities_answer(ssh_public_key: &str) -> AgentMessage {
    match key_blob_from_text(ssh_public_key) {
        Some(key_blob) => AgentMessage::with_contents(
            MessageType::IdentitiesAnswer,
            IdentitiesAnswer::new(key_blob).encode(),
        ),
        None => {
            warn!("authority returned unparseable public key text");
            AgentMessage::failure()
        }
    }
}

fn mismatched(op: &'static str, response: &AuthorityResponse) -> AgentMessage {
    warn!(op, ?response, "authority answered with the wrong response kind");
    AgentMessage::failure()
}

/// Zero linger makes the close send a reset, so the client sees the agent as
/// unavailable rather than finished.
#[allow(deprecated)]
fn abort(stream: &TcpStream) {
    if let Err(err) = stream.set_linger(Some(Duration::ZERO)) {
        debug!(?err, "failed to set zero linger");
    }
}
