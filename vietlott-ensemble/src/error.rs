use thiserror::Error;
use vietlott_db::models::{Session, Variant};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{model} model is not ready")]
    ModelNotReady { model: String },

    #[error("insufficient history: need at least {needed} draws, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("no active prediction cycle for {0}")]
    NoActiveCycle(Variant),

    #[error("prediction cycle {cycle_id} has no prediction")]
    NoPrediction { cycle_id: i64 },

    #[error("draw {draw_id}{} not found for {variant}", .session.map(|s| format!(" ({s})")).unwrap_or_default())]
    DrawNotFound {
        variant: Variant,
        draw_id: String,
        session: Option<Session>,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("only {available} distinct candidates for {needed} picks")]
    InsufficientCandidates { needed: usize, available: usize },

    #[error("{model} training failed: {message}")]
    Training { model: String, message: String },

    #[error("model artifact {model}: {message}")]
    Artifact { model: String, message: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl Error {
    pub fn not_ready(model: &str) -> Self {
        Error::ModelNotReady { model: model.to_string() }
    }

    pub fn training(model: &str, err: impl std::fmt::Display) -> Self {
        Error::Training { model: model.to_string(), message: err.to_string() }
    }

    pub fn artifact(model: &str, err: impl std::fmt::Display) -> Self {
        Error::Artifact { model: model.to_string(), message: err.to_string() }
    }

    /// Errors after which an orchestrator can report and move on to the
    /// next variant.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ModelNotReady { .. }
                | Error::NoActiveCycle(_)
                | Error::NoPrediction { .. }
                | Error::DrawNotFound { .. }
                | Error::InvalidRecord(_)
                | Error::Training { .. }
        )
    }

    /// What the operator should run to clear the error, when there is such a step.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            Error::ModelNotReady { .. } => Some("run `vietlott train` for this variant"),
            Error::InsufficientHistory { .. } => Some("import more draws with `vietlott import`"),
            Error::NoActiveCycle(_) | Error::NoPrediction { .. } => Some("run `vietlott generate` first"),
            Error::DrawNotFound { .. } => Some("import the draw with `vietlott import`, then check again"),
            _ => None,
        }
    }
}
