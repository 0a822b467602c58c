//! Error types for node provisioning and supervision.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::node::NodeState;

#[derive(Error, Debug)]
pub enum NodeError {
    /// A required setting or environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The configuration template lacks a section the node needs.
    #[error("configuration template missing {0} section")]
    MissingSection(String),

    /// The configuration template could not be parsed or serialized.
    #[error("configuration document error: {0}")]
    Document(#[from] serde_yaml::Error),

    /// Directory or file creation/write failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key generation or certificate encoding failure.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The node never became ready; the process has been killed.
    #[error("timeout whilst waiting for {node} to start ({timeout:?})")]
    StartTimeout { node: String, timeout: Duration },

    /// The process exited before it became ready.
    #[error("failed to start {node}: {cause}")]
    ProcessExit { node: String, cause: ExitCause },

    /// The process could not be killed. Its handle has been dropped anyway.
    #[error("failed to stop {node}: {source}")]
    Stop {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is already starting")]
    AlreadyStarting(String),

    #[error("{node} cannot start from state {state}")]
    InvalidState { node: String, state: NodeState },
}

impl NodeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NodeError::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration failures are raised before any process is spawned.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NodeError::Configuration(_) | NodeError::MissingSection(_) | NodeError::Document(_)
        )
    }
}

impl From<rcgen::Error> for NodeError {
    fn from(e: rcgen::Error) -> Self {
        NodeError::Certificate(e.to_string())
    }
}

/// Why a supervised process went away.
#[derive(Debug)]
pub enum ExitCause {
    Exited(ExitStatus),
    Wait(std::io::Error),
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Exited(status) => write!(f, "process exited ({})", status),
            ExitCause::Wait(e) => write!(f, "failed to wait for process: {}", e),
        }
    }
}

impl std::error::Error for ExitCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExitCause::Exited(_) => None,
            ExitCause::Wait(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
