//! Probe drivers, one per class of target
//!
//! Each driver turns a typed [`ProbeSpec`](crate::target::ProbeSpec) variant
//! into an [`Outcome`]. Drivers own their connection for the duration of the
//! call only and close it before returning.
//!
//! Failures a driver cannot express as a status-bearing outcome are returned
//! as [`ProbeError`]; the check executor converts those into outcomes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Timeouts;
use crate::outcome::{Outcome, Status};
use crate::target::ProbeSpec;

pub mod backup;
pub mod database;
pub mod http;
pub mod local;
pub mod remote;
pub mod shell;

pub use backup::BackupProbe;
pub use database::DatabaseProbe;
pub use http::HttpProbe;
pub use local::LocalProbe;
pub use remote::RemoteServerProbe;
pub use shell::{ShellConnector, ShellSession, SshConnector};

/// Failures raised by probe drivers
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Host unreachable, connection refused or connect timeout
    ConnectFailure(String),

    /// Credentials rejected
    AuthFailure(String),

    /// An operation on an established connection timed out
    TimeoutFailure(String),

    /// Unexpected output, failed command or malformed query
    ProtocolFailure(String),

    /// The target config cannot be probed as written
    InvalidConfig(String),
}

impl ProbeError {
    /// Status of the observation recorded for this failure.
    pub fn status(&self) -> Status {
        match self {
            ProbeError::ConnectFailure(_) | ProbeError::AuthFailure(_) => Status::Offline,
            ProbeError::TimeoutFailure(_)
            | ProbeError::ProtocolFailure(_)
            | ProbeError::InvalidConfig(_) => Status::Error,
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::ConnectFailure(msg) => write!(f, "connection failed: {}", msg),
            ProbeError::AuthFailure(msg) => write!(f, "authentication failed: {}", msg),
            ProbeError::TimeoutFailure(msg) => write!(f, "timed out: {}", msg),
            ProbeError::ProtocolFailure(msg) => write!(f, "protocol error: {}", msg),
            ProbeError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Capability every probe implementation offers to the check executor
#[async_trait]
pub trait ProbeDriver: Send + Sync {
    async fn probe(&self, spec: &ProbeSpec) -> Result<Outcome, ProbeError>;
}

/// The production drivers, dispatched on the spec variant
pub struct DriverSet {
    local: LocalProbe,
    remote: RemoteServerProbe,
    http: HttpProbe,
    database: DatabaseProbe,
    backup: BackupProbe,
}

impl DriverSet {
    pub fn new(timeouts: &Timeouts) -> Self {
        Self::with_connector(timeouts, Arc::new(SshConnector::new(timeouts.ssh)))
    }

    /// Build the driver set on top of a custom remote shell transport.
    pub fn with_connector(timeouts: &Timeouts, connector: Arc<dyn ShellConnector>) -> Self {
        Self {
            local: LocalProbe::new(),
            remote: RemoteServerProbe::new(connector.clone(), timeouts.ssh),
            http: HttpProbe::new(timeouts.http),
            database: DatabaseProbe::new(timeouts.database),
            backup: BackupProbe::new(connector, timeouts.ssh),
        }
    }
}

#[async_trait]
impl ProbeDriver for DriverSet {
    async fn probe(&self, spec: &ProbeSpec) -> Result<Outcome, ProbeError> {
        match spec {
            ProbeSpec::LocalServer(spec) => self.local.probe_server(spec).await,
            ProbeSpec::Storage(spec) => self.local.probe_storage(spec).await,
            ProbeSpec::RemoteServer(spec) => self.remote.probe(spec).await,
            ProbeSpec::Application(spec) => self.http.probe(spec).await,
            ProbeSpec::Database(spec) => self.database.probe_liveness(spec).await,
            ProbeSpec::Business(spec) => self.database.probe_business(spec).await,
            ProbeSpec::Backup(spec) => self.backup.probe(spec).await,
        }
    }
}
