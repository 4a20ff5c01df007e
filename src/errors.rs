use thiserror::Error;

#[derive(Debug, Error)]
pub enum CurtinError {
    #[error("no such file")]
    NoSuchFile(std::io::Error, String),

    #[error("no such device")]
    NoSuchDevice(String),

    #[error("bad storage config")]
    BadConfig(String),

    #[error("bad environment")]
    BadEnvironment(String),

    #[error("bad cli arguments")]
    BadArgs(String),

    #[error("probe failed")]
    ProbeFailed(String),

    #[error("shell command failed")]
    CmdFailed {
        error: Option<std::io::Error>,
        context: String,
    },

    #[error("holders remain on device")]
    HoldersNotClear(String),

    #[error("action failed")]
    ApplyFailed {
        id: String,
        entry_type: String,
        context: String,
    },

    #[error("preserved device does not match config")]
    VerifyMismatch {
        id: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("curtin-rs bug")]
    CurtinRsBug(String),
}

impl CurtinError {
    /// Exit codes are part of the CLI contract:
    /// 2 for config/schema/environment errors raised before any device is
    /// touched, 3 for probe/teardown/execution failures, 4 for preserve
    /// verification mismatches.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BadConfig(_)
            | Self::BadArgs(_)
            | Self::BadEnvironment(_)
            | Self::NoSuchFile(_, _) => 2,

            Self::VerifyMismatch { .. } => 4,

            _ => 3,
        }
    }
}
