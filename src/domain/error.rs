//! Domain error types.

/// Top-level error type for portopt.
#[derive(Debug, thiserror::Error)]
pub enum PortoptError {
    #[error("insufficient data for {ticker}: {reason}")]
    InsufficientData { ticker: String, reason: String },

    #[error("target not achievable ({target}): {reason}")]
    TargetNotAchievable { target: String, reason: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("solver failed after {iterations} iterations: {reason}")]
    SolverFailure { iterations: usize, reason: String },

    #[error("only {succeeded} of {requested} simulations succeeded, need at least {required}")]
    MinimumSimulations {
        requested: usize,
        succeeded: usize,
        required: usize,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PortoptError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PortoptError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        PortoptError::InsufficientData {
            ticker: ticker.into(),
            reason: reason.into(),
        }
    }

    pub fn unreachable_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        PortoptError::TargetNotAchievable {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl From<&PortoptError> for std::process::ExitCode {
    fn from(err: &PortoptError) -> Self {
        let code: u8 = match err {
            PortoptError::Io(_) => 1,
            PortoptError::ConfigParse { .. } | PortoptError::ConfigInvalid { .. } => 2,
            PortoptError::Data { .. } => 3,
            PortoptError::InvalidParameter { .. } => 4,
            PortoptError::InsufficientData { .. } => 5,
            PortoptError::TargetNotAchievable { .. } => 6,
            PortoptError::SolverFailure { .. } => 7,
            PortoptError::MinimumSimulations { .. } => 8,
        };
        std::process::ExitCode::from(code)
    }
}
