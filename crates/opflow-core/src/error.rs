use crate::blob::LogicalBlobId;

/// All errors raised while building a job.
///
/// Every failure is reported synchronously to the caller of the construction
/// function, and none of them leave a partially registered node behind.
/// [`Error::category`] folds the variants into the four-way taxonomy callers
/// usually branch on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A caller-supplied argument failed a structural check (bad rank, enum, arity).
    #[error("invalid parameter `{field}` for {op}: {reason}")]
    InvalidParameter {
        op: String,
        field: String,
        reason: String,
    },

    /// A scalar-or-sequence parameter had a length other than 1 or the target length.
    #[error("{param} should be of length 1 or {expected} but was {got}")]
    ParamLength {
        param: String,
        expected: usize,
        got: usize,
    },

    /// The request names a feature that is deliberately not implemented.
    #[error("{op}: {feature} is not supported")]
    Unsupported { op: String, feature: String },

    /// An operator with this name is already registered in the job.
    #[error("operator name `{name}` is already registered")]
    NameCollision { name: String },

    /// A blob signature was already recorded for this logical blob.
    #[error("signature for `{lbi}` is already recorded")]
    SignatureExists { lbi: LogicalBlobId },

    /// Shape, dtype or attribute incompatibility found once input signatures are known.
    #[error("inference failed for `{op_name}`: {cause}")]
    Inference { op_name: String, cause: String },

    /// Malformed serialized job or operator.
    #[error("decode error: {0}")]
    Decode(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidParameter,
    Unsupported,
    NameCollision,
    Inference,
    Other,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn invalid(
        op: impl ToString,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            op: op.to_string(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(op: impl ToString, feature: impl Into<String>) -> Self {
        Error::Unsupported {
            op: op.to_string(),
            feature: feature.into(),
        }
    }

    pub fn inference(op_name: impl Into<String>, cause: impl Into<String>) -> Self {
        Error::Inference {
            op_name: op_name.into(),
            cause: cause.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidParameter { .. } | Error::ParamLength { .. } => {
                ErrorCategory::InvalidParameter
            }
            Error::Unsupported { .. } => ErrorCategory::Unsupported,
            Error::NameCollision { .. } => ErrorCategory::NameCollision,
            Error::Inference { .. } | Error::SignatureExists { .. } => ErrorCategory::Inference,
            Error::Decode(_) | Error::Msg(_) => ErrorCategory::Other,
        }
    }
}

/// Convenience Result type used throughout opflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
