use std::fmt;
use std::path::PathBuf;

use crate::{Rank, VertexId};

#[derive(Debug)]
pub enum FireError {
    /// Malformed line in a partition edge or partition-map file.
    PartitionLoad {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    /// Message addressed to a rank outside the mesh.
    UnknownDestination { rank: Rank, size: usize },
    /// No worker owns this vertex according to the partition map.
    UnknownOwner(VertexId),
    ProtocolViolation(String),
    Transport(String),
    Config(String),
    Serialization(Box<bincode::error::EncodeError>),
    Deserialization(Box<bincode::error::DecodeError>),
    Json(serde_json::Error),
    Io(std::io::Error),
    Other(String),
}

impl FireError {
    /// Whether the run must abort. Protocol anomalies and burn requests for
    /// unowned vertices are logged and skipped instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FireError::ProtocolViolation(_) | FireError::UnknownOwner(_)
        )
    }
}

impl fmt::Display for FireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FireError::PartitionLoad { path, line, reason } => {
                write!(f, "Partition load error: {}:{}: {}", path.display(), line, reason)
            }
            FireError::UnknownDestination { rank, size } => {
                write!(f, "Unknown destination: rank {} (mesh size {})", rank, size)
            }
            FireError::UnknownOwner(v) => write!(f, "Unknown destination: no owner for vertex {}", v),
            FireError::ProtocolViolation(e) => write!(f, "Protocol violation: {}", e),
            FireError::Transport(e) => write!(f, "Transport error: {}", e),
            FireError::Config(e) => write!(f, "Config error: {}", e),
            FireError::Serialization(e) => write!(f, "Serialization error: {}", e),
            FireError::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            FireError::Json(e) => write!(f, "JSON error: {}", e),
            FireError::Io(e) => write!(f, "IO error: {}", e),
            FireError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for FireError {}

impl From<bincode::error::EncodeError> for FireError {
    fn from(err: bincode::error::EncodeError) -> Self {
        FireError::Serialization(Box::new(err))
    }
}

impl From<bincode::error::DecodeError> for FireError {
    fn from(err: bincode::error::DecodeError) -> Self {
        FireError::Deserialization(Box::new(err))
    }
}

impl From<serde_json::Error> for FireError {
    fn from(err: serde_json::Error) -> Self {
        FireError::Json(err)
    }
}

impl From<std::io::Error> for FireError {
    fn from(err: std::io::Error) -> Self {
        FireError::Io(err)
    }
}

impl From<String> for FireError {
    fn from(err: String) -> Self {
        FireError::Other(err)
    }
}

impl From<&str> for FireError {
    fn from(err: &str) -> Self {
        FireError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violations_are_not_fatal() {
        assert!(!FireError::ProtocolViolation("stray heartbeat".into()).is_fatal());
        assert!(!FireError::UnknownOwner(42).is_fatal());
        assert!(FireError::UnknownDestination { rank: 9, size: 3 }.is_fatal());
        assert!(FireError::Transport("closed".into()).is_fatal());
    }

    #[test]
    fn test_display_names_location() {
        let err = FireError::PartitionLoad {
            path: PathBuf::from("node1.e"),
            line: 7,
            reason: "expected two ids".into(),
        };
        assert_eq!(err.to_string(), "Partition load error: node1.e:7: expected two ids");
    }
}
