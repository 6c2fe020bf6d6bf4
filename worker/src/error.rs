use std::{error::Error, fmt, io};

use machine_learning::{MlErr, initialization::RandErr};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Every reason a training run can be aborted.
#[derive(Debug)]
pub enum TrainErr {
    /// A raw record couldn't be parsed into a sample.
    MalformedRecord {
        key: u64,
        reason: String,
    },
    /// The job configuration is inconsistent, detected before the first iteration.
    Configuration(String),
    /// A peer disconnected or broke the protocol while the gradient was being reduced.
    PartitionUnavailable {
        host: usize,
        reason: String,
    },
    /// A weight update couldn't be delivered to a peer, or a peer vanished while
    /// the updates were being exchanged.
    BroadcastDelivery {
        host: usize,
        source: io::Error,
    },
    Ml(MlErr),
    Io(io::Error),
}

impl TrainErr {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub(crate) fn broadcast(host: usize, reason: impl Into<String>) -> Self {
        Self::BroadcastDelivery {
            host,
            source: io::Error::new(io::ErrorKind::InvalidData, reason.into()),
        }
    }
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::MalformedRecord { key, reason } => {
                write!(f, "malformed record {key}: {reason}")
            }
            TrainErr::Configuration(reason) => write!(f, "invalid configuration: {reason}"),
            TrainErr::PartitionUnavailable { host, reason } => {
                write!(f, "partial gradient of host {host} unavailable: {reason}")
            }
            TrainErr::BroadcastDelivery { host, source } => {
                write!(f, "broadcast to host {host} failed: {source}")
            }
            TrainErr::Ml(e) => write!(f, "{e}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::BroadcastDelivery { source, .. } => Some(source),
            TrainErr::Ml(e) => Some(e),
            TrainErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<MlErr> for TrainErr {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::MalformedRecord { key, reason } => Self::MalformedRecord { key, reason },
            MlErr::Io(e) => Self::Io(e),
            other => Self::Ml(other),
        }
    }
}

impl From<RandErr> for TrainErr {
    fn from(value: RandErr) -> Self {
        Self::Configuration(value.to_string())
    }
}
