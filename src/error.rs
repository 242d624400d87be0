//! The error type shared by every promise in this crate.

use std::{any::Any, borrow::Cow};

/// Domain reported by the errors this crate produces on its own.
pub const DOMAIN: &str = "oath";

/// The outcome of a settled promise.
pub type Outcome<T> = Result<T, Error>;

/// Why a promise was rejected.
///
/// Every rejection in the crate carries one of these, whether it was produced by a combinator
/// ([`Error::TimedOut`], [`Error::ValidationFailure`]), by the core itself ([`Error::Panicked`],
/// [`Error::Abandoned`]), or by user code ([`Error::Domain`]). Every variant can be described as a
/// `(domain, code, message)` triple.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The promise did not settle before its timeout elapsed.
    #[error("promise timed out")]
    TimedOut,
    /// A validation predicate rejected the fulfilled value.
    #[error("promise value failed validation")]
    ValidationFailure,
    /// User-supplied work panicked. Carries the panic message, if it had one.
    #[error("work panicked: {0}")]
    Panicked(String),
    /// Every [`Resolver`][crate::Resolver] was dropped while the promise was still pending.
    #[error("promise abandoned by all of its resolvers")]
    Abandoned,
    /// An application-defined error.
    #[error("{domain} error {code}: {message}")]
    Domain {
        domain: Cow<'static, str>,
        code: i64,
        message: String,
    },
}

impl Error {
    /// Creates an application-defined error.
    pub fn new<D, M>(domain: D, code: i64, message: M) -> Self
    where
        D: Into<Cow<'static, str>>,
        M: Into<String>,
    {
        Self::Domain {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        Self::Panicked(message)
    }

    /// Returns the domain this error belongs to.
    pub fn domain(&self) -> &str {
        match self {
            Self::Domain { domain, .. } => domain,
            _ => DOMAIN,
        }
    }

    /// Returns the numeric code of this error within its domain.
    pub fn code(&self) -> i64 {
        match self {
            Self::TimedOut => 1,
            Self::ValidationFailure => 2,
            Self::Panicked(_) => 3,
            Self::Abandoned => 4,
            Self::Domain { code, .. } => *code,
        }
    }

    /// Returns the human-readable part of the error.
    pub fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Panicked(message) | Self::Domain { message, .. } => {
                Cow::Borrowed(message.as_str())
            }
            other => Cow::Owned(other.to_string()),
        }
    }

    #[inline]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    #[inline]
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::ValidationFailure)
    }

    #[inline]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    #[inline]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}
