use std::sync::Arc;

use tracing::{error, info, warn};

use crate::authority::AuthorityProvider;
use crate::bridge::{Bridge, BridgeHost};
use crate::config::BridgeConfig;
use crate::registry::WorkerRegistry;
use crate::BridgeError;

/// Receives errors that should be shown to the user.
pub type ErrorReporter = Arc<dyn Fn(u16, &BridgeError) + Send + Sync>;

/// Starts one bridge worker per forwarded port and tracks them until they exit.
pub struct AgentService {
    bridge: Bridge,
    key_id: String,
    workers: WorkerRegistry,
    reporter: ErrorReporter,
}

impl AgentService {
    pub fn new(provider: Arc<dyn AuthorityProvider>, config: &BridgeConfig) -> Self {
        Self {
            bridge: Bridge::new(provider, config.timeouts()),
            key_id: config.key_id(),
            workers: WorkerRegistry::new(),
            reporter: Arc::new(|port: u16, err: &BridgeError| {
                error!(port, %err, "agent unavailable");
            }),
        }
    }

    pub fn with_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Spawns a worker for `port`. Returns `false` if one is already running.
    pub fn start(self: &Arc<Self>, port: u16) -> bool {
        if !self.workers.register(port) {
            warn!(port, "agent worker already running for port");
            return false;
        }
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.bridge.run(port, service.as_ref()).await;
        });
        info!(port, "agent worker started");
        true
    }

    pub fn active_ports(&self) -> Vec<u16> {
        self.workers.ports()
    }

    /// Resolves once every started worker has exited.
    pub async fn wait_idle(&self) {
        self.workers.wait_idle().await;
    }
}

impl BridgeHost for AgentService {
    fn key_id(&self) -> String {
        self.key_id.clone()
    }

    fn report_error(&self, port: u16, err: &BridgeError) {
        (self.reporter)(port, err);
    }

    fn worker_exited(&self, port: u16) {
        match self.workers.remove(port) {
            Some(elapsed) => info!(port, ?elapsed, "agent worker exited"),
            None => warn!(port, "exit reported for unknown agent worker"),
        }
        if self.workers.is_empty() {
            info!("no agent workers left");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use keybridge_proto::{read_frame, write_frame, AgentMessage, MessageType};
    use tokio::net::TcpListener;

    use super::*;
    use crate::authority::{
        AuthorityRequest, AuthorityResponse, AuthoritySession, ConnectCallback,
    };

    struct Fixed {
        connect_ok: bool,
        key_ids: Mutex<Vec<String>>,
    }

    impl AuthoritySession for Fixed {
        fn connect(&self, on_result: ConnectCallback) {
            on_result(self.connect_ok);
        }

        fn execute_api(&self, request: AuthorityRequest) -> Option<AuthorityResponse> {
            if let AuthorityRequest::Sign { key_id, .. } = request {
                self.key_ids.lock().unwrap().push(key_id);
            }
            Some(AuthorityResponse::Signature {
                signature: vec![7; 8],
            })
        }
    }

    struct FixedProvider(Arc<Fixed>);

    impl AuthorityProvider for FixedProvider {
        fn open(&self) -> Arc<dyn AuthoritySession> {
            self.0.clone()
        }
    }

    fn service(connect_ok: bool) -> (AgentService, Arc<Fixed>) {
        let authority = Arc::new(Fixed {
            connect_ok,
            key_ids: Mutex::new(Vec::new()),
        });
        let config = BridgeConfig::from_json(r#"{"ssh_key":"configured"}"#).unwrap();
        let service = AgentService::new(Arc::new(FixedProvider(authority.clone())), &config);
        (service, authority)
    }

    fn sign_request() -> AgentMessage {
        AgentMessage::with_contents(MessageType::SignRequest, vec![0, 0, 0, 1, 42, 0, 0, 0, 0])
    }

    #[tokio::test]
    async fn workers_run_independently_and_report_idle() {
        let (service, authority) = service(true);
        let service = Arc::new(service);
        let first = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let second = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let first_port = first.local_addr().unwrap().port();
        let second_port = second.local_addr().unwrap().port();

        assert!(service.start(first_port));
        assert!(service.start(second_port));
        assert!(!service.start(first_port));

        let (mut a, _) = first.accept().await.unwrap();
        let (mut b, _) = second.accept().await.unwrap();

        write_frame(&mut b, &sign_request()).await.unwrap();
        write_frame(&mut a, &sign_request()).await.unwrap();
        let response = read_frame(&mut a).await.unwrap().unwrap();
        assert_eq!(response.kind(), Some(MessageType::SignResponse));
        let response = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(response.kind(), Some(MessageType::SignResponse));

        drop(a);
        drop(b);
        service.wait_idle().await;
        assert!(service.active_ports().is_empty());
        assert_eq!(
            *authority.key_ids.lock().unwrap(),
            vec!["configured".to_string(), "configured".to_string()]
        );
    }

    #[tokio::test]
    async fn connect_failure_reaches_reporter() {
        let (service, _authority) = service(false);
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let service = Arc::new(service.with_reporter(Arc::new(
            move |port: u16, err: &BridgeError| {
                assert!(err.is_connect_error());
                sink.lock().unwrap().push(port);
            },
        )));

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(service.start(port));
        let (_socket, _) = listener.accept().await.unwrap();

        service.wait_idle().await;
        assert_eq!(*reported.lock().unwrap(), vec![port]);
    }
}
