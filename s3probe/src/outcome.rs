//! Classification of façade results into allowed, denied, or broken.
use crate::error::ServiceFailure;
use crate::permissions::Expectation;
use crate::{Result, S3ProbeError};

/// S3 error codes that mean the request was understood but refused for lack of authorization
const DENIED_CODES: &[&str] = &["AccessDenied", "Forbidden", "AllAccessDisabled"];

/// What happened when an operation was attempted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The service performed the operation
    Allowed,

    /// The service refused the operation on authorization grounds
    Denied { failure: ServiceFailure },

    /// The operation failed for some other reason, which is never what a test expects
    Failed { message: String },
}

impl Outcome {
    /// Classify the result of a façade call
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Allowed,
            Err(e) => Self::of_error(e),
        }
    }

    pub fn of_error(e: &S3ProbeError) -> Self {
        match e.service_failure() {
            Some(failure) if is_denial(&failure) => Self::Denied { failure },
            Some(failure) => Self::Failed {
                message: format!("{e} ({failure})"),
            },
            None => Self::Failed {
                message: e.to_string(),
            },
        }
    }

    /// Does this outcome satisfy the expectation?
    pub fn matches(&self, expectation: Expectation) -> bool {
        matches!(
            (self, expectation),
            (Self::Allowed, Expectation::Allow) | (Self::Denied { .. }, Expectation::Deny)
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied { failure } => write!(f, "denied ({failure})"),
            Self::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Decide if the failure reported by the service is an authorization denial.
///
/// The error code decides when there is one.  Responses to `HEAD` requests carry no body and thus
/// no code, so then the status decides.
pub fn is_denial(failure: &ServiceFailure) -> bool {
    match failure.code.as_deref() {
        Some(code) if DENIED_CODES.contains(&code) => true,
        Some(_) => false,
        None => matches!(failure.status, Some(401) | Some(403)),
    }
}

/// Same as [`is_denial`] for the code of a per-key error in a `DeleteObjects` response
pub fn is_denial_code(code: Option<&str>) -> bool {
    code.map(|code| DENIED_CODES.contains(&code))
        .unwrap_or(false)
}
