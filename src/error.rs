use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The host returned a null object for a create call.
    #[error("host refused to create {what}")]
    HostCreateFailed { what: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("camera is already controlled by this plugin")]
    CameraBusy,

    #[error("unknown object: {0}")]
    UnknownObject(String),

    #[error("name contains an interior NUL byte: {0:?}")]
    InvalidName(String),

    #[error("config error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether the error came back from the host rather than from the caller.
    pub fn is_host_failure(&self) -> bool {
        matches!(self, BridgeError::HostCreateFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_failure_classification() {
        assert!(BridgeError::HostCreateFailed { what: "menu" }.is_host_failure());
        assert!(!BridgeError::CameraBusy.is_host_failure());
        assert!(!BridgeError::InvalidArgument("x".into()).is_host_failure());
    }

    #[test]
    fn display_messages() {
        let err = BridgeError::HostCreateFailed { what: "flight loop" };
        assert_eq!(err.to_string(), "host refused to create flight loop");
        let err = BridgeError::InvalidName("a\0b".into());
        assert!(err.to_string().contains("NUL"));
    }
}
