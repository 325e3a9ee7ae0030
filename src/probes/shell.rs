//! Remote shell transport used by the remote-server and backup probes
//!
//! The probes talk to a [`ShellConnector`] so tests can substitute a scripted
//! session; production uses [`SshConnector`] on top of `async-ssh2-tokio`.

use std::sync::LazyLock;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use async_trait::async_trait;
use regex::Regex;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::config::SshTimeouts;
use crate::target::{ShellAuth, ShellTarget};

use super::ProbeError;

/// An open remote shell session
#[async_trait]
pub trait ShellSession: Send {
    /// Run a one-line command and return its stdout. Output on stderr is
    /// treated as a failed command.
    async fn exec(&mut self, command: &str, limit: Duration) -> Result<String, ProbeError>;

    /// Tear the session down. Never fails; problems are only logged.
    async fn close(self: Box<Self>);
}

/// Opens remote shell sessions
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(&self, target: &ShellTarget) -> Result<Box<dyn ShellSession>, ProbeError>;
}

/// SSH transport with separate connect, banner and authentication budgets
pub struct SshConnector {
    timeouts: SshTimeouts,
}

impl SshConnector {
    pub fn new(timeouts: SshTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    #[instrument(skip_all, fields(host = %target.host, port = target.port))]
    async fn connect(&self, target: &ShellTarget) -> Result<Box<dyn ShellSession>, ProbeError> {
        let auth = match target.auth()? {
            ShellAuth::KeyFile(path) => AuthMethod::with_key_file(path.as_str(), None),
            ShellAuth::Password(password) => AuthMethod::with_password(&password),
        };
        let address = format!("{}:{}", target.host, target.port);

        // plain TCP first so unreachable hosts fail within the connect budget
        match timeout(
            self.timeouts.connect,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        {
            Err(_) => {
                return Err(ProbeError::ConnectFailure(format!(
                    "{address}: no answer within {:?}",
                    self.timeouts.connect
                )));
            }
            Ok(Err(e)) => return Err(ProbeError::ConnectFailure(format!("{address}: {e}"))),
            Ok(Ok(stream)) => drop(stream),
        }

        let handshake = self.timeouts.banner + self.timeouts.auth;
        let client = match timeout(
            handshake,
            Client::connect(
                (target.host.clone(), target.port),
                &target.username,
                auth,
                ServerCheckMethod::NoCheck,
            ),
        )
        .await
        {
            Err(_) => {
                return Err(ProbeError::ConnectFailure(format!(
                    "{address}: ssh handshake did not complete within {handshake:?}"
                )));
            }
            Ok(Err(e)) => return Err(classify_ssh_error(&address, e)),
            Ok(Ok(client)) => client,
        };

        debug!("ssh session established");
        Ok(Box::new(SshSession { client }))
    }
}

fn classify_ssh_error(address: &str, err: async_ssh2_tokio::Error) -> ProbeError {
    match err {
        async_ssh2_tokio::Error::PasswordWrong | async_ssh2_tokio::Error::KeyAuthFailed => {
            ProbeError::AuthFailure(format!("{address}: {err}"))
        }
        other => ProbeError::ConnectFailure(format!("{address}: {other}")),
    }
}

struct SshSession {
    client: Client,
}

#[async_trait]
impl ShellSession for SshSession {
    async fn exec(&mut self, command: &str, limit: Duration) -> Result<String, ProbeError> {
        trace!("executing remote command: {command}");

        let result = match timeout(limit, self.client.execute(command)).await {
            Err(_) => {
                return Err(ProbeError::TimeoutFailure(format!(
                    "command did not finish within {limit:?}"
                )));
            }
            Ok(Err(e)) => return Err(ProbeError::ProtocolFailure(e.to_string())),
            Ok(Ok(result)) => result,
        };

        let stderr = result.stderr.trim();
        if !stderr.is_empty() {
            return Err(ProbeError::ProtocolFailure(stderr.to_string()));
        }

        Ok(result.stdout)
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.client.disconnect().await {
            debug!("error while closing ssh session: {e}");
        }
    }
}

static PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/?[A-Za-z0-9._\-]+(/[A-Za-z0-9._\-]+)*/?$|^/$").expect("valid regex"));
static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._\-:@ ]+$").expect("valid regex"));
static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._\-*?\[\]]+$").expect("valid regex"));

/// Accept a path only if it can be placed in a shell command unquoted.
pub fn safe_path(value: &str) -> Result<&str, ProbeError> {
    check(&PATH, "path", value)
}

/// Process names are placed inside single quotes.
pub fn safe_name(value: &str) -> Result<&str, ProbeError> {
    check(&NAME, "process name", value)
}

/// File globs are placed inside single quotes.
pub fn safe_pattern(value: &str) -> Result<&str, ProbeError> {
    check(&PATTERN, "file pattern", value)
}

fn check<'a>(regex: &Regex, what: &str, value: &'a str) -> Result<&'a str, ProbeError> {
    if regex.is_match(value) {
        Ok(value)
    } else {
        Err(ProbeError::ProtocolFailure(format!(
            "refusing to run remote command with {what} {value:?}"
        )))
    }
}
