/// Result of a stage that never aborts the run.
///
/// `Success` carries what the remote service produced. `Fallback` carries the
/// stage's default value together with the reason the real value was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome<T> {
    Success(T),
    Fallback { value: T, cause: String },
}

impl<T> StageOutcome<T> {
    pub fn fallback(value: T, cause: impl Into<String>) -> Self {
        Self::Fallback {
            value,
            cause: cause.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Success(value) => value,
            Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Success(value) => value,
            Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Fallback { cause, .. } => Some(cause.as_str()),
        }
    }
}
