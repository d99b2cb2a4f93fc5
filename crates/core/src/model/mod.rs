//! Demand model lifecycle: train, persist, lazy-load, predict, recommend.
//!
//! `DemandModel` is the single owner of the in-memory model. A trained model and its
//! feature-name list live together in one `Arc<TrainedModel>` that is replaced wholesale
//! after the artifact has been written, so readers see either the old pair or the new one.

pub mod artifact;
pub mod gbdt;

use crate::config::Settings;
use crate::domain::contract::PredictionInput;
use crate::domain::recommendation::{
    recommend, recommend_optional, InventoryQuery, InventoryStatus, Recommendation,
    RecommendationResult, StockRecommendation,
};
use crate::domain::record::SalesRecord;
use crate::error::{DemandError, Result};
use crate::features::{check_schema, FeaturePipeline};
use artifact::{ArtifactStore, ModelArtifact};
use chrono::NaiveDate;
use gbdt::{mean_squared_error, r2_score, BoostingParams, GradientBoostedRegressor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

pub const SPLIT_SEED: u64 = 42;
pub const VALIDATION_FRACTION: f64 = 0.2;

#[derive(Debug)]
pub struct TrainedModel {
    pub run_id: Uuid,
    pub regressor: GradientBoostedRegressor,
    pub feature_names: Vec<String>,
    confidence_score: f64,
}

impl TrainedModel {
    fn new(run_id: Uuid, regressor: GradientBoostedRegressor, feature_names: Vec<String>) -> Self {
        let importances = regressor.feature_importances();
        // Model-global proxy, identical for every prediction.
        let confidence_score = if importances.is_empty() {
            0.0
        } else {
            importances.iter().sum::<f64>() / importances.len() as f64
        };
        Self {
            run_id,
            regressor,
            feature_names,
            confidence_score,
        }
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Untrained,
    Persisted,
    TrainedInMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub metrics: TrainingMetrics,
    pub best_iteration: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub features: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_demand: f64,
    pub confidence_score: f64,
}

/// Feature matrix ready for fitting, with the schema it was built against.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    pub feature_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub target: Vec<f64>,
}

#[derive(Debug)]
pub struct DemandModel {
    pipeline: FeaturePipeline,
    store: ArtifactStore,
    params: BoostingParams,
    current: RwLock<Option<Arc<TrainedModel>>>,
    // Serialises training and lazy loading so a load never overwrites a fresher model.
    lifecycle: Mutex<()>,
}

impl DemandModel {
    pub fn new(pipeline: FeaturePipeline, store: ArtifactStore) -> Self {
        Self {
            pipeline,
            store,
            params: BoostingParams::default(),
            current: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            FeaturePipeline::new(settings.feature_config()),
            ArtifactStore::new(settings.model_path.clone()),
        )
    }

    pub fn with_params(mut self, params: BoostingParams) -> Self {
        self.params = params;
        self
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn state(&self) -> ModelState {
        if self.loaded().is_some() {
            ModelState::TrainedInMemory
        } else if self.store.exists() {
            ModelState::Persisted
        } else {
            ModelState::Untrained
        }
    }

    fn loaded(&self) -> Option<Arc<TrainedModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, model: Arc<TrainedModel>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(model);
    }

    /// Runs the batch feature pipeline and checks the result is a well-formed schema.
    pub fn build_training_matrix(&self, records: &[SalesRecord]) -> Result<TrainingMatrix> {
        let frame = self.pipeline.process(records)?;
        let feature_names = frame.features.feature_names();
        check_schema(&feature_names)?;
        let rows = frame.features.to_rows()?;
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != feature_names.len())
        {
            return Err(DemandError::FeatureSchemaMismatch(format!(
                "row {i} has {} values for {} feature names",
                row.len(),
                feature_names.len()
            )));
        }
        Ok(TrainingMatrix {
            feature_names,
            rows,
            target: frame.target,
        })
    }

    /// Fits a new model on the whole history, writes it through to the artifact store and
    /// only then makes it visible to `predict`.
    pub fn train(&self, records: &[SalesRecord]) -> Result<TrainingReport> {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);

        let matrix = self.build_training_matrix(records)?;
        let (train_idx, valid_idx) = split_indices(matrix.rows.len(), VALIDATION_FRACTION, SPLIT_SEED)?;

        let pick_rows = |idx: &[usize]| idx.iter().map(|&i| matrix.rows[i].clone()).collect::<Vec<_>>();
        let pick_target = |idx: &[usize]| idx.iter().map(|&i| matrix.target[i]).collect::<Vec<_>>();
        let (train_x, train_y) = (pick_rows(&train_idx), pick_target(&train_idx));
        let (valid_x, valid_y) = (pick_rows(&valid_idx), pick_target(&valid_idx));

        tracing::info!(
            train_rows = train_x.len(),
            validation_rows = valid_x.len(),
            features = matrix.feature_names.len(),
            "training demand model"
        );

        let validation = (!valid_x.is_empty()).then_some((valid_x.as_slice(), valid_y.as_slice()));
        let regressor = GradientBoostedRegressor::fit(&self.params, &train_x, &train_y, validation)?;

        let (eval_x, eval_y) = if valid_x.is_empty() {
            (&train_x, &train_y)
        } else {
            (&valid_x, &valid_y)
        };
        let predictions = regressor.predict(eval_x)?;
        let mse = mean_squared_error(eval_y, &predictions);
        let metrics = TrainingMetrics {
            mse,
            rmse: mse.sqrt(),
            r2: r2_score(eval_y, &predictions),
        };

        let run_id = Uuid::new_v4();
        let best_iteration = regressor.best_iteration();
        let features = matrix.feature_names.len();
        let artifact = ModelArtifact::new(run_id, regressor, matrix.feature_names);
        self.store.save(&artifact)?;

        self.swap(Arc::new(TrainedModel::new(
            run_id,
            artifact.regressor,
            artifact.feature_names,
        )));

        tracing::info!(
            %run_id,
            best_iteration,
            mse = metrics.mse,
            rmse = metrics.rmse,
            r2 = metrics.r2,
            "demand model trained"
        );

        Ok(TrainingReport {
            run_id,
            metrics,
            best_iteration,
            train_rows: train_x.len(),
            validation_rows: valid_x.len(),
            features,
        })
    }

    /// Returns the in-memory model, reading the persisted artifact on first use.
    pub fn ensure_loaded(&self) -> Result<Arc<TrainedModel>> {
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = self.loaded() {
            return Ok(model);
        }

        tracing::info!(model_path = %self.store.model_path().display(), "loading persisted model");
        let (artifact, feature_names) = self.store.load()?;
        let model = Arc::new(TrainedModel::new(
            artifact.run_id,
            artifact.regressor,
            feature_names,
        ));
        self.swap(model.clone());
        Ok(model)
    }

    pub fn predict(&self, input: &PredictionInput) -> Result<Prediction> {
        let model = self.ensure_loaded()?;
        let computed = self.pipeline.prepare_prediction_features(input);
        let aligned = computed.reindex(&model.feature_names)?;
        let predicted_demand = model.regressor.predict_row(&aligned.values())?;
        Ok(Prediction {
            predicted_demand,
            confidence_score: model.confidence_score(),
        })
    }

    pub fn recommend(
        &self,
        predicted_demand: f64,
        current_stock: i64,
        restock_threshold: i64,
    ) -> Recommendation {
        recommend(predicted_demand, current_stock, restock_threshold)
    }

    /// Prediction plus label; without a stock level the label is `N/A`.
    pub fn predict_with_recommendation(
        &self,
        input: &PredictionInput,
        current_stock: Option<i64>,
        restock_threshold: i64,
    ) -> Result<RecommendationResult> {
        let prediction = self.predict(input)?;
        Ok(RecommendationResult {
            predicted_demand: prediction.predicted_demand,
            confidence_score: prediction.confidence_score,
            label: recommend_optional(prediction.predicted_demand, current_stock, restock_threshold),
        })
    }

    /// Predicts demand on `as_of` for each item and applies its own stock threshold.
    pub fn inventory_status(&self, as_of: NaiveDate, items: &[InventoryQuery]) -> Result<InventoryStatus> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let prediction = self.predict(&item.to_input(as_of)?)?;
            out.push(StockRecommendation {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                region: item.region.clone(),
                current_stock: item.current_stock,
                predicted_demand: prediction.predicted_demand,
                recommendation: recommend(
                    prediction.predicted_demand,
                    item.current_stock,
                    item.restock_threshold,
                ),
                restock_threshold: item.restock_threshold,
            });
        }
        let status = InventoryStatus::from_items(out);
        tracing::info!(
            %as_of,
            total_items = status.total_items,
            low_stock_count = status.low_stock_count,
            overstock_count = status.overstock_count,
            "computed inventory status"
        );
        Ok(status)
    }
}

/// Seeded shuffle, then the first `ceil(n * fraction)` rows become the validation partition.
pub fn split_indices(n: usize, fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_valid = (n as f64 * fraction).ceil() as usize;
    if n < 2 || n_valid >= n {
        return Err(DemandError::validation(format!(
            "dataset too small to split into train/validation partitions ({n} rows)"
        )));
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let train = indices.split_off(n_valid);
    Ok((train, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureConfig;

    fn history(days: i64) -> Vec<SalesRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut out = Vec::new();
        for (product_id, region, base) in [(1, "North", 20.0), (2, "South", 80.0)] {
            for d in 0..days {
                let date = start + chrono::Duration::days(d);
                let weekend = d % 7 >= 5;
                out.push(SalesRecord {
                    date,
                    product_id,
                    product_name: format!("Item {product_id}"),
                    category: "Grocery".to_string(),
                    region: region.to_string(),
                    weather: if d % 3 == 0 { "Rainy" } else { "Sunny" }.to_string(),
                    is_festival: d % 10 == 0,
                    quantity_sold: base + if weekend { 15.0 } else { 0.0 },
                    current_stock: Some(100),
                    restock_threshold: Some(30),
                });
            }
        }
        out
    }

    fn model(dir: &tempfile::TempDir) -> DemandModel {
        DemandModel::new(
            FeaturePipeline::new(FeatureConfig::default()),
            ArtifactStore::new(dir.path().join("demand.json")),
        )
    }

    fn input(product_id: i64, region: &str) -> PredictionInput {
        PredictionInput {
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            product_id,
            region: region.to_string(),
            weather: "Sunny".to_string(),
            is_festival: false,
        }
    }

    #[test]
    fn predict_without_artifact_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        assert_eq!(model.state(), ModelState::Untrained);
        let err = model.predict(&input(1, "North")).unwrap_err();
        assert!(matches!(err, DemandError::ModelNotFound { .. }), "{err:?}");
    }

    #[test]
    fn train_writes_through_and_predicts() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        let report = model.train(&history(42)).unwrap();
        assert_eq!(model.state(), ModelState::TrainedInMemory);
        assert!(model.store().exists());
        assert_eq!(report.train_rows + report.validation_rows, 84);
        assert_eq!(report.validation_rows, 17);
        assert!(report.metrics.rmse >= 0.0);
        assert!((report.metrics.rmse - report.metrics.mse.sqrt()).abs() < 1e-12);

        let low = model.predict(&input(1, "North")).unwrap();
        let high = model.predict(&input(2, "South")).unwrap();
        assert!(high.predicted_demand > low.predicted_demand);
        assert!(low.confidence_score > 0.0 && low.confidence_score <= 1.0);
    }

    #[test]
    fn fresh_instance_lazily_loads_persisted_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let trained = model(&dir);
        trained.train(&history(30)).unwrap();
        let expected = trained.predict(&input(2, "South")).unwrap();

        let restarted = model(&dir);
        assert_eq!(restarted.state(), ModelState::Persisted);
        let got = restarted.predict(&input(2, "South")).unwrap();
        assert_eq!(restarted.state(), ModelState::TrainedInMemory);
        assert_eq!(got, expected);
    }

    #[test]
    fn unseen_category_at_inference_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        model.train(&history(30)).unwrap();
        let trained = model.ensure_loaded().unwrap();
        assert!(!trained.feature_names.iter().any(|n| n == "region_Atlantis"));

        let mut unseen = input(1, "Atlantis");
        unseen.weather = "Blizzard".to_string();
        let prediction = model.predict(&unseen).unwrap();
        assert!(prediction.predicted_demand.is_finite());
    }

    #[test]
    fn short_single_group_history_trains_without_lags() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        let records: Vec<SalesRecord> = history(5)
            .into_iter()
            .filter(|r| r.product_id == 1)
            .collect();
        let matrix = model.build_training_matrix(&records).unwrap();
        let lag7 = matrix
            .feature_names
            .iter()
            .position(|n| n == "quantity_sold_lag_7")
            .unwrap();
        assert!(matrix.rows.iter().all(|r| r[lag7] == 0.0));
        model.train(&records).unwrap();
    }

    #[test]
    fn retrain_replaces_model_and_schema_together() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        model.train(&history(20)).unwrap();
        let first = model.ensure_loaded().unwrap();

        let mut more = history(20);
        for r in more.iter_mut().filter(|r| r.product_id == 2) {
            r.region = "East".to_string();
        }
        model.train(&more).unwrap();
        let second = model.ensure_loaded().unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert!(second.feature_names.iter().any(|n| n == "region_East"));
        assert!(first.feature_names.iter().any(|n| n == "region_South"));
        assert_eq!(second.regressor.n_features(), second.feature_names.len());
    }

    #[test]
    fn readers_never_see_a_half_swapped_model_during_retraining() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        let narrow = history(14);
        let mut wide = history(14);
        for r in wide.iter_mut().filter(|r| r.product_id == 2) {
            r.region = "East".to_string();
            r.weather = "Foggy".to_string();
        }
        let narrow_width = model.build_training_matrix(&narrow).unwrap().feature_names.len();
        let wide_width = model.build_training_matrix(&wide).unwrap().feature_names.len();
        assert_ne!(narrow_width, wide_width);

        model.train(&narrow).unwrap();
        let done = AtomicBool::new(false);
        let (shared, done) = (&model, &done);

        std::thread::scope(|s| {
            let readers: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(move || {
                        let mut seen = 0usize;
                        while !done.load(Ordering::Acquire) || seen == 0 {
                            let snapshot = shared.ensure_loaded().unwrap();
                            assert_eq!(snapshot.regressor.n_features(), snapshot.feature_names.len());
                            assert!([narrow_width, wide_width].contains(&snapshot.feature_names.len()));
                            let prediction = shared.predict(&input(2, "South")).unwrap();
                            assert!(prediction.predicted_demand.is_finite());
                            seen += 1;
                        }
                        seen
                    })
                })
                .collect();

            for round in 0..4 {
                let records = if round % 2 == 0 { &wide } else { &narrow };
                shared.train(records).unwrap();
            }
            done.store(true, Ordering::Release);

            for reader in readers {
                assert!(reader.join().unwrap() > 0);
            }
        });

        assert_eq!(model.ensure_loaded().unwrap().feature_names.len(), narrow_width);
    }

    #[test]
    fn empty_dataset_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            model(&dir).train(&[]),
            Err(DemandError::DataValidation(_))
        ));
    }

    #[test]
    fn inventory_status_uses_each_items_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        model.train(&history(30)).unwrap();
        let query = |stock, threshold| InventoryQuery {
            product_id: 1,
            product_name: "Item 1".to_string(),
            region: "North".to_string(),
            weather: "Sunny".to_string(),
            is_festival: false,
            current_stock: stock,
            restock_threshold: threshold,
        };
        let as_of = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let status = model
            .inventory_status(as_of, &[query(10, 10), query(10_000, 5)])
            .unwrap();
        assert_eq!(status.total_items, 2);
        assert_eq!(status.items[0].recommendation, Recommendation::Restock);
        assert_eq!(status.items[1].recommendation, Recommendation::Overstock);
        assert_eq!(status.low_stock_count, 1);
        assert_eq!(status.overstock_count, 1);
    }

    #[test]
    fn missing_stock_yields_not_applicable() {
        let dir = tempfile::tempdir().unwrap();
        let model = model(&dir);
        model.train(&history(20)).unwrap();
        let result = model
            .predict_with_recommendation(&input(1, "North"), None, 60)
            .unwrap();
        assert_eq!(result.label, Recommendation::NotApplicable);
    }

    #[test]
    fn split_is_reproducible_and_sized() {
        let (train_a, valid_a) = split_indices(10, 0.2, SPLIT_SEED).unwrap();
        let (train_b, valid_b) = split_indices(10, 0.2, SPLIT_SEED).unwrap();
        assert_eq!((train_a.clone(), valid_a.clone()), (train_b, valid_b));
        assert_eq!(valid_a.len(), 2);
        assert_eq!(train_a.len(), 8);
        assert!(split_indices(1, 0.2, SPLIT_SEED).is_err());
    }
}
