//! Authority reached by running a helper program per operation.
//!
//! Each call spawns the configured program, writes one JSON request to its
//! stdin and reads one JSON response from its stdout. A non-zero exit status
//! or a response that is not a JSON object is a decline; connect is answered
//! with any object, usually `{}`. The helper owns everything about the keys; this module only
//! moves requests across the process boundary.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::authority::{
    AuthorityProvider, AuthorityRequest, AuthorityResponse, AuthoritySession, ConnectCallback,
};
use crate::public_key::BASE64;

#[derive(Clone, Debug)]
pub struct CommandConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandConfig {
    /// Splits `argv` into program and arguments. `None` if `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }
}

#[derive(Clone)]
pub struct CommandAuthority {
    config: Arc<CommandConfig>,
}

impl CommandAuthority {
    pub fn new(config: CommandConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl AuthorityProvider for CommandAuthority {
    fn open(&self) -> Arc<dyn AuthoritySession> {
        Arc::new(CommandSession {
            config: self.config.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn authority_kind(&self) -> &'static str {
        "command"
    }
}

struct CommandSession {
    config: Arc<CommandConfig>,
    closed: AtomicBool,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireRequest<'a> {
    Connect,
    PublicKey {
        key_id: &'a str,
    },
    Sign {
        key_id: &'a str,
        data: String,
        flags: u32,
    },
}

#[derive(Deserialize)]
struct WireResponse {
    ssh_public_key: Option<String>,
    signature: Option<String>,
}

impl AuthoritySession for CommandSession {
    fn connect(&self, on_result: ConnectCallback) {
        let config = self.config.clone();
        let spawned = std::thread::Builder::new()
            .name("authority-connect".into())
            .spawn(move || {
                let ok = run(&config, &WireRequest::Connect)
                    .and_then(|stdout| parse_response(&stdout))
                    .is_some();
                on_result(ok);
            });
        // On failure the callback is dropped with the closure, which the
        // waiting side observes as an abandoned handshake.
        if let Err(err) = spawned {
            warn!(?err, "failed to start authority connect thread");
        }
    }

    fn execute_api(&self, request: AuthorityRequest) -> Option<AuthorityResponse> {
        if self.closed.load(Ordering::Acquire) {
            warn!(op = request.op(), "request on closed authority session");
            return None;
        }
        match request {
            AuthorityRequest::PublicKey { key_id } => {
                let stdout = run(&self.config, &WireRequest::PublicKey { key_id: &key_id })?;
                let response = parse_response(&stdout)?;
                let ssh_public_key = response.ssh_public_key?;
                Some(AuthorityResponse::PublicKey { ssh_public_key })
            }
            AuthorityRequest::Sign {
                data,
                key_id,
                flags,
            } => {
                let wire = WireRequest::Sign {
                    key_id: &key_id,
                    data: BASE64.encode(&data),
                    flags,
                };
                let stdout = run(&self.config, &wire)?;
                let response = parse_response(&stdout)?;
                let signature = match BASE64.decode(response.signature?) {
                    Ok(signature) => signature,
                    Err(err) => {
                        warn!(?err, "authority returned invalid signature encoding");
                        return None;
                    }
                };
                Some(AuthorityResponse::Signature { signature })
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Runs the helper once. Returns its stdout if it exited successfully.
fn run(config: &CommandConfig, request: &WireRequest<'_>) -> Option<Vec<u8>> {
    let input = match serde_json::to_vec(request) {
        Ok(input) => input,
        Err(err) => {
            warn!(?err, "failed to encode authority request");
            return None;
        }
    };

    let mut child = match Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(?err, program = %config.program.display(), "failed to start authority");
            return None;
        }
    };

    // Stdin is fed from its own thread so a helper that writes a lot before
    // reading cannot block on a full pipe while we block on its stdin.
    let waited = std::thread::scope(|scope| {
        if let Some(mut stdin) = child.stdin.take() {
            let input = &input;
            scope.spawn(move || {
                if let Err(err) = stdin.write_all(input) {
                    debug!(?err, "authority closed stdin early");
                }
            });
        }
        child.wait_with_output()
    });
    let output = match waited {
        Ok(output) => output,
        Err(err) => {
            warn!(?err, "failed to wait for authority");
            return None;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().next().unwrap_or("").trim();
        warn!(status = ?output.status, reason, "authority declined request");
        return None;
    }
    Some(output.stdout)
}

fn parse_response(stdout: &[u8]) -> Option<WireResponse> {
    match serde_json::from_slice(stdout) {
        Ok(response) => Some(response),
        Err(err) => {
            warn!(?err, "authority returned malformed response");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn shell(script: &str) -> CommandAuthority {
        CommandAuthority::new(CommandConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    fn connect_outcome(session: &dyn AuthoritySession) -> Option<bool> {
        let (tx, rx) = mpsc::channel();
        session.connect(Box::new(move |ok: bool| {
            let _ = tx.send(ok);
        }));
        rx.recv_timeout(Duration::from_secs(10)).ok()
    }

    #[test]
    fn from_argv_splits_program() {
        let argv = vec!["/opt/authority".to_string(), "--json".to_string()];
        let config = CommandConfig::from_argv(&argv).unwrap();
        assert_eq!(config.program, PathBuf::from("/opt/authority"));
        assert_eq!(config.args, vec!["--json".to_string()]);
        assert!(CommandConfig::from_argv(&[]).is_none());
    }

    #[test]
    fn connect_reports_exit_status() {
        let ok = shell("cat >/dev/null; echo '{}'").open();
        assert_eq!(connect_outcome(ok.as_ref()), Some(true));

        let refused = shell("cat >/dev/null; echo 'locked' >&2; exit 1").open();
        assert_eq!(connect_outcome(refused.as_ref()), Some(false));
    }

    #[test]
    fn connect_requires_json_answer() {
        let garbage = shell("cat >/dev/null; echo 'ready'").open();
        assert_eq!(connect_outcome(garbage.as_ref()), Some(false));

        let silent = shell("cat >/dev/null").open();
        assert_eq!(connect_outcome(silent.as_ref()), Some(false));

        let with_fields = shell(r#"cat >/dev/null; echo '{"version":1}'"#).open();
        assert_eq!(connect_outcome(with_fields.as_ref()), Some(true));
    }

    #[test]
    fn large_request_to_chatty_helper_completes() {
        let session = shell(
            r#"head -c 200000 /dev/zero >&2
cat >/dev/null
echo '{"signature":"c2ln"}'"#,
        )
        .open();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(session.execute_api(AuthorityRequest::Sign {
                data: vec![7; 300_000],
                key_id: "k1".to_string(),
                flags: 0,
            }));
        });
        let response = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(
            response,
            Some(AuthorityResponse::Signature {
                signature: b"sig".to_vec()
            })
        );
    }

    #[test]
    fn unpadded_signature_is_accepted() {
        let session = shell("cat >/dev/null; echo '{\"signature\":\"c2lnbg\"}'").open();
        assert_eq!(
            session.execute_api(AuthorityRequest::Sign {
                data: vec![1],
                key_id: String::new(),
                flags: 0,
            }),
            Some(AuthorityResponse::Signature {
                signature: b"sign".to_vec()
            })
        );
    }

    #[test]
    fn public_key_request_maps_to_response() {
        let session = shell(
            r#"input=$(cat)
case "$input" in
  *'"op":"public_key"'*'"key_id":"k1"'*) echo '{"ssh_public_key":"ssh-ed25519 AAAA test"}' ;;
  *) exit 2 ;;
esac"#,
        )
        .open();
        let response = session.execute_api(AuthorityRequest::PublicKey {
            key_id: "k1".to_string(),
        });
        assert_eq!(
            response,
            Some(AuthorityResponse::PublicKey {
                ssh_public_key: "ssh-ed25519 AAAA test".to_string()
            })
        );
    }

    #[test]
    fn sign_request_sends_base64_data_and_flags() {
        let session = shell(
            r#"input=$(cat)
case "$input" in
  *'"data":"ZGF0YQ=="'*'"flags":2'*) echo '{"signature":"c2ln"}' ;;
  *) exit 2 ;;
esac"#,
        )
        .open();
        let response = session.execute_api(AuthorityRequest::Sign {
            data: b"data".to_vec(),
            key_id: "k1".to_string(),
            flags: 2,
        });
        assert_eq!(
            response,
            Some(AuthorityResponse::Signature {
                signature: b"sig".to_vec()
            })
        );
    }

    #[test]
    fn failures_and_garbage_are_declines() {
        let failing = shell("cat >/dev/null; exit 1").open();
        assert_eq!(
            failing.execute_api(AuthorityRequest::PublicKey {
                key_id: String::new()
            }),
            None
        );

        let garbage = shell("cat >/dev/null; echo 'not json'").open();
        assert_eq!(
            garbage.execute_api(AuthorityRequest::PublicKey {
                key_id: String::new()
            }),
            None
        );

        let wrong_field = shell("cat >/dev/null; echo '{\"signature\":\"c2ln\"}'").open();
        assert_eq!(
            wrong_field.execute_api(AuthorityRequest::PublicKey {
                key_id: String::new()
            }),
            None
        );
    }

    #[test]
    fn closed_session_declines() {
        let session = shell("cat >/dev/null; echo '{\"signature\":\"c2ln\"}'").open();
        session.close();
        assert_eq!(
            session.execute_api(AuthorityRequest::Sign {
                data: vec![1],
                key_id: String::new(),
                flags: 0,
            }),
            None
        );
    }
}
