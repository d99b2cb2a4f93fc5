use crate::error::{DemandError, Result};
use crate::features::check_schema;
use crate::model::gbdt::GradientBoostedRegressor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const FORMAT_VERSION: u32 = 2;
const COLUMNS_SUFFIX: &str = ".columns";

/// Serialized regressor state plus the ordered feature names it was fit on. The names are
/// also written to `<model_path>.columns`; `load` refuses a pair whose lists disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub regressor: GradientBoostedRegressor,
}

impl ModelArtifact {
    pub fn new(run_id: Uuid, regressor: GradientBoostedRegressor, feature_names: Vec<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            run_id,
            trained_at: Utc::now(),
            feature_names,
            regressor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    model_path: PathBuf,
}

impl ArtifactStore {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn columns_path(&self) -> PathBuf {
        let mut s = self.model_path.clone().into_os_string();
        s.push(COLUMNS_SUFFIX);
        PathBuf::from(s)
    }

    pub fn exists(&self) -> bool {
        self.model_path.is_file() && self.columns_path().is_file()
    }

    /// Writes both parts to temporary siblings first, then renames them into place.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<()> {
        let feature_names = &artifact.feature_names;
        check_schema(feature_names)?;
        if artifact.regressor.n_features() != feature_names.len() {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "regressor has {} features, schema lists {}",
                artifact.regressor.n_features(),
                feature_names.len()
            )));
        }

        if let Some(parent) = self.model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DemandError::artifact(format!("create {}", parent.display()), e))?;
        }

        let model_json = serde_json::to_vec(artifact).map_err(invalid_data)?;
        let columns_json = serde_json::to_vec_pretty(feature_names).map_err(invalid_data)?;

        let columns_path = self.columns_path();
        let model_tmp = tmp_path(&self.model_path);
        let columns_tmp = tmp_path(&columns_path);
        write(&model_tmp, &model_json)?;
        write(&columns_tmp, &columns_json)?;
        rename(&model_tmp, &self.model_path)?;
        rename(&columns_tmp, &columns_path)?;

        tracing::info!(
            model_path = %self.model_path.display(),
            columns_path = %columns_path.display(),
            features = feature_names.len(),
            run_id = %artifact.run_id,
            "persisted model artifact"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<(ModelArtifact, Vec<String>)> {
        let columns_path = self.columns_path();
        let model_bytes = read(&self.model_path, &self.model_path)?;
        let columns_bytes = read(&columns_path, &self.model_path)?;

        let artifact: ModelArtifact = serde_json::from_slice(&model_bytes).map_err(invalid_data)?;
        let feature_names: Vec<String> =
            serde_json::from_slice(&columns_bytes).map_err(invalid_data)?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(DemandError::artifact(
                format!("read {}", self.model_path.display()),
                std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!("unsupported artifact format_version {}", artifact.format_version),
                ),
            ));
        }
        check_schema(&feature_names)?;
        if artifact.feature_names != feature_names {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "{} does not match the feature names stored in {} (run {})",
                columns_path.display(),
                self.model_path.display(),
                artifact.run_id
            )));
        }
        if let Err(detail) = artifact.regressor.check_structure() {
            return Err(DemandError::artifact(
                format!("read {}", self.model_path.display()),
                std::io::Error::new(ErrorKind::InvalidData, detail),
            ));
        }
        if artifact.regressor.n_features() != feature_names.len() {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "artifact regressor has {} features, {} lists {}",
                artifact.regressor.n_features(),
                columns_path.display(),
                feature_names.len()
            )));
        }

        tracing::info!(
            model_path = %self.model_path.display(),
            run_id = %artifact.run_id,
            features = feature_names.len(),
            "loaded model artifact"
        );
        Ok((artifact, feature_names))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.to_path_buf().into_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| DemandError::artifact(format!("write {}", path.display()), e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    std::fs::rename(from, to)
        .map_err(|e| DemandError::artifact(format!("rename {} -> {}", from.display(), to.display()), e))
}

/// A missing part means there is no usable model; any other I/O failure is reported as such.
fn read(path: &Path, model_path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DemandError::ModelNotFound {
            path: model_path.to_path_buf(),
        },
        _ => DemandError::artifact(format!("read {}", path.display()), e),
    })
}

fn invalid_data(e: serde_json::Error) -> DemandError {
    DemandError::artifact(
        "decode model artifact",
        std::io::Error::new(ErrorKind::InvalidData, e),
    )
}
