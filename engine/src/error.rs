use crate::port::PortId;
use crate::unit::UnitUid;
use thiserror::Error;

/// Rejections raised at the edit boundary. None of these ever mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("cannot connect {src} to {dest}: incompatible ports")]
    InvalidConnection { src: PortId, dest: PortId },
    #[error("connecting {src} to {dest} would create a cycle")]
    WouldCreateCycle { src: PortId, dest: PortId },
    #[error("unknown port {0}")]
    UnknownPort(PortId),
    #[error("no connection from {src} to {dest}")]
    NotFound { src: PortId, dest: PortId },
    #[error("connection from {src} to {dest} is locked")]
    Locked { src: PortId, dest: PortId },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("unknown unit {0}")]
    UnknownUnit(UnitUid),
    #[error("unit {0} already exists")]
    DuplicateUnit(UnitUid),
    #[error("session: {0}")]
    Session(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
