use crate::{
    config::ConfigError,
    credentials::SecretError,
    dns::ApiError,
};
use std::fmt;

pub type Result<T, E = SolverError> = std::result::Result<T, E>;

/// The step of the solver lifecycle an error surfaced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Present,
    CleanUp,
    Initialize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Present => write!(f, "present failed"),
            Stage::CleanUp => write!(f, "clean up failed"),
            Stage::Initialize => write!(f, "initializing cert-manager-webhook-{} failed", crate::SOLVER_NAME),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The process-lifetime token was cancelled.
    Context,
    /// The stop signal handed to `initialize` fired.
    StopSignal,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Context => write!(f, "context canceled"),
            CancelReason::StopSignal => write!(f, "early termination signal"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<SolverError>,
    },

    #[error("loading challenge-request config failed: {0}")]
    ConfigDecode(#[from] ConfigError),

    #[error("failed to load access and secret keys: {0}")]
    CredentialResolution(String),

    #[error("failed to load access and secret keys: {0}")]
    SecretLookup(#[from] SecretError),

    #[error("creating an opentelekomcloud dns service client failed: {0}")]
    ClientConstruction(#[source] ApiError),

    #[error("creating a kubernetes client failed: {0}")]
    ClusterClient(#[source] kube::Error),

    #[error("found {count} zones while expecting 1 for zone {zone}")]
    AmbiguousZone { zone: String, count: usize },

    #[error("{operation} failed: {source}")]
    RecordSet {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("{0}")]
    Cancelled(CancelReason),
}

impl SolverError {
    pub(crate) fn within(self, stage: Stage) -> Self {
        SolverError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    pub(crate) fn record_set(operation: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| SolverError::RecordSet { operation, source }
    }

    /// Strips stage wrappers and returns the error that started the chain.
    pub fn root(&self) -> &SolverError {
        match self {
            SolverError::Stage { source, .. } => source.root(),
            err => err,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            SolverError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_prefixes_message() {
        let err = SolverError::AmbiguousZone {
            zone: "example.com.".to_string(),
            count: 0,
        }
        .within(Stage::Present);

        assert_eq!(
            err.to_string(),
            "present failed: found 0 zones while expecting 1 for zone example.com."
        );
        assert_eq!(err.stage(), Some(Stage::Present));
        assert!(matches!(err.root(), SolverError::AmbiguousZone { count: 0, .. }));
    }

    #[test]
    fn initialize_stage_names_the_solver() {
        let err = SolverError::Cancelled(CancelReason::StopSignal).within(Stage::Initialize);
        assert_eq!(
            err.to_string(),
            "initializing cert-manager-webhook-opentelekomcloud failed: early termination signal"
        );
    }
}
