use thiserror::Error;

use crate::search::EvaluationRecord;

/// Main error type for the Crucible system
#[derive(Error, Debug)]
pub enum CrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The run observed its cancellation token. The evaluations made so far are
    /// kept for diagnostics only; they are not a finished result.
    #[error("Optimization cancelled after {evaluations} evaluations")]
    Cancelled {
        evaluations: usize,
        partial_history: Vec<EvaluationRecord>,
    },

    #[error("Objective evaluation {evaluation} failed: {message}")]
    Objective { evaluation: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CrError {
    /// True when the run ended because a caller asked it to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// History accumulated before a cancellation, if any.
    pub fn partial_history(&self) -> Option<&[EvaluationRecord]> {
        match self {
            Self::Cancelled {
                partial_history, ..
            } => Some(partial_history),
            _ => None,
        }
    }
}

/// Result type alias for Crucible operations
pub type CrResult<T> = Result<T, CrError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::CrError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::CrError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CrError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Point;

    #[test]
    fn test_error_display() {
        let error = CrError::Objective {
            evaluation: 7,
            message: "model offline".to_string(),
        };

        assert!(error.to_string().contains("Objective evaluation 7"));
        assert!(error.to_string().contains("model offline"));
    }

    #[test]
    fn test_cancelled_carries_partial_history() {
        let record = EvaluationRecord::new(Point::new(), 1.5);
        let error = CrError::Cancelled {
            evaluations: 1,
            partial_history: vec![record.clone()],
        };

        assert!(error.is_cancelled());
        assert_eq!(error.partial_history(), Some(&[record][..]));
        assert!(!config_error!("bad").is_cancelled());
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let cr_error: CrError = json_err.into();

        match cr_error {
            CrError::Serialization(_) => (),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        let _internal_err = internal_error!("Something went wrong");
        let config_err = config_error!("Missing required field: {}", "budget");

        assert!(matches!(validation_err, CrError::Validation(_)));
        assert!(config_err.to_string().contains("budget"));
    }
}
