use std::path::PathBuf;
use thiserror::Error;

/// Every failure the forecasting core can surface. Callers map [`DemandError::kind`] to
/// their own transport; nothing in the core retries.
#[derive(Debug, Error)]
pub enum DemandError {
    #[error("data validation failed: {0}")]
    DataValidation(String),

    #[error("model not found at {}. Please train the model first.", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("external service {service} failed: {detail}")]
    ExternalService {
        service: &'static str,
        detail: String,
    },

    #[error("feature schema mismatch: {0}")]
    FeatureSchemaMismatch(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("model artifact I/O failed ({context})")]
    Artifact {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DemandError {
    pub fn kind(&self) -> &'static str {
        match self {
            DemandError::DataValidation(_) => "data_validation",
            DemandError::ModelNotFound { .. } => "model_not_found",
            DemandError::ExternalService { .. } => "external_service",
            DemandError::FeatureSchemaMismatch(_) => "feature_schema_mismatch",
            DemandError::Prediction(_) => "prediction",
            DemandError::Artifact { .. } => "artifact",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        DemandError::DataValidation(msg.into())
    }

    pub(crate) fn artifact(context: impl Into<String>, source: std::io::Error) -> Self {
        DemandError::Artifact {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DemandError> = std::result::Result<T, E>;
