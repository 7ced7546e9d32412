use thiserror::Error;

/// Failure taxonomy shared by every stage. Attached to `anyhow` chains so
/// callers can recover the category with [`FailureKind::classify`].
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{service} request failed ({code}): {body}")]
    Status {
        service: &'static str,
        code: u16,
        body: String,
    },
    #[error("{service} response is missing `{field}`")]
    MissingField {
        service: &'static str,
        field: &'static str,
    },
    #[error("{service} reported failure: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },
    #[error("no candidates left: {0}")]
    NoCandidates(String),
    #[error("rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Status,
    Malformed,
    EmptyCandidates,
    Render,
}

impl FailureKind {
    pub fn classify(err: &anyhow::Error) -> Self {
        // Catches StageError attached as context as well as as the root cause.
        if let Some(stage) = err.downcast_ref::<StageError>() {
            return Self::from_stage(stage);
        }
        for cause in err.chain() {
            if let Some(stage) = cause.downcast_ref::<StageError>() {
                return Self::from_stage(stage);
            }
            if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
                if let Some(status) = http.status() {
                    if !status.is_success() {
                        return Self::Status;
                    }
                }
                if http.is_decode() {
                    return Self::Malformed;
                }
                return Self::Transport;
            }
            if cause.downcast_ref::<serde_json::Error>().is_some() {
                return Self::Malformed;
            }
            if cause.downcast_ref::<image::ImageError>().is_some()
                || cause.downcast_ref::<ab_glyph::InvalidFont>().is_some()
            {
                return Self::Render;
            }
        }
        Self::Transport
    }

    fn from_stage(stage: &StageError) -> Self {
        match stage {
            StageError::Status { .. } => Self::Status,
            StageError::MissingField { .. } | StageError::Rejected { .. } => Self::Malformed,
            StageError::NoCandidates(_) => Self::EmptyCandidates,
            StageError::Render(_) => Self::Render,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Status => "http_status",
            Self::Malformed => "malformed_response",
            Self::EmptyCandidates => "empty_candidates",
            Self::Render => "render",
        }
    }
}
