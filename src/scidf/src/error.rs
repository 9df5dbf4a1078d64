use std::io;

/// Every fallible operation in this crate returns this.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the container format. Variants name the failure
/// kind (malformed structure, unsupported feature, missing path, ...),
/// not internal implementation details.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a container: no signature found at any candidate offset")]
    NotAContainer,

    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    #[error("corrupt structure: {0}")]
    CorruptStructure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("wrong kind: {0}")]
    WrongKind(String),

    #[error("link depth exceeded (> {0} hops)")]
    LinkDepthExceeded(u32),

    #[error("link cycle detected at {0}")]
    LinkCycle(String),

    #[error("operation attempted on a closed file")]
    Closed,

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Error {
        Error::CorruptStructure(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Error {
        Error::NotFound(msg.into())
    }

    pub(crate) fn wrong_kind(msg: impl Into<String>) -> Error {
        Error::WrongKind(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Error {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Error {
        Error::UnsupportedFeature(msg.into())
    }
}
