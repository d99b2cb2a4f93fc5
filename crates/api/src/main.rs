use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stocksense_core::dataset;
use stocksense_core::domain::contract::{PredictionRequest, PredictionResponse};
use stocksense_core::domain::recommendation::{InventoryQuery, InventoryStatus};
use stocksense_core::model::{DemandModel, ModelState, TrainingMetrics};
use stocksense_core::weather::{WeatherApiClient, WeatherSource};
use stocksense_core::DemandError;

const API_PREFIX: &str = "/api/v1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stocksense_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let weather: Option<Arc<dyn WeatherSource>> = match WeatherApiClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "weather lookup disabled; requests must include weather");
            None
        }
    };

    let model = Arc::new(DemandModel::from_settings(&settings));
    tracing::info!(
        state = ?model.state(),
        model_path = %settings.model_path.display(),
        "demand model ready"
    );

    let state = AppState {
        model,
        weather,
        data_path: settings.data_path.clone(),
        default_restock_threshold: settings.default_restock_threshold,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/predict", post(predict_demand))
        .route("/recommend", get(inventory_recommendations))
        .route("/train", post(train_model))
        .route("/model", get(model_status));

    Router::new()
        .route("/healthz", get(healthz))
        .nest(API_PREFIX, api)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    model: Arc<DemandModel>,
    weather: Option<Arc<dyn WeatherSource>>,
    data_path: PathBuf,
    default_restock_threshold: i64,
}

#[derive(Debug)]
enum ApiError {
    Demand(DemandError),
    Internal(anyhow::Error),
}

impl From<DemandError> for ApiError {
    fn from(e: DemandError) -> Self {
        ApiError::Demand(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Demand(DemandError::DataValidation(rejection.body_text()))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(anyhow::Error::new(e).context("blocking task failed"))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

fn status_for(err: &DemandError) -> StatusCode {
    match err {
        DemandError::DataValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DemandError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        DemandError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
        DemandError::FeatureSchemaMismatch(_)
        | DemandError::Prediction(_)
        | DemandError::Artifact { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, err) = match self {
            ApiError::Demand(e) => {
                let status = status_for(&e);
                let detail = if status.is_server_error() {
                    server_error_detail(status)
                } else {
                    e.to_string()
                };
                let body = ErrorBody {
                    error: e.kind(),
                    detail,
                };
                (status, body, anyhow::Error::new(e))
            }
            ApiError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "internal",
                    detail: server_error_detail(StatusCode::INTERNAL_SERVER_ERROR),
                },
                e,
            ),
        };

        if status.is_server_error() {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), %status, "request failed");
        } else {
            tracing::warn!(error = %err, %status, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

/// Server-side failures are logged and reported in full; clients only see the status reason.
fn server_error_detail(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("server error").to_string()
}

async fn resolve_weather(state: &AppState, region: &str, date: NaiveDate) -> Result<String, DemandError> {
    let Some(source) = &state.weather else {
        return Err(DemandError::ExternalService {
            service: "weather",
            detail: "weather is missing and WEATHERAPI_KEY is not configured".to_string(),
        });
    };
    source.condition(region, date).await
}

async fn predict_demand(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let Json(request) = payload?;
    let resolved = if request.needs_weather() && !request.region.trim().is_empty() {
        Some(resolve_weather(&state, request.region.trim(), request.date).await?)
    } else {
        None
    };

    let current_stock = request.current_stock;
    let input = request.validate_and_into_input(resolved)?;
    let threshold = state.default_restock_threshold;
    let model = state.model.clone();

    let result = tokio::task::spawn_blocking(move || {
        model.predict_with_recommendation(&input, current_stock, threshold)
    })
    .await??;

    Ok(Json(PredictionResponse {
        predicted_demand: result.predicted_demand,
        recommendation: result.label,
        confidence_score: result.confidence_score,
    }))
}

async fn inventory_recommendations(
    State(state): State<AppState>,
) -> Result<Json<InventoryStatus>, ApiError> {
    let data_path = state.data_path.clone();
    let mut queries = tokio::task::spawn_blocking(move || {
        let records = dataset::load_sales_records(&data_path)?;
        dataset::latest_per_group(&records)
            .into_iter()
            .map(InventoryQuery::from_record)
            .collect::<Result<Vec<_>, DemandError>>()
    })
    .await??;

    let today = chrono::Local::now().date_naive();
    for query in queries.iter_mut().filter(|q| q.needs_weather()) {
        query.weather = resolve_weather(&state, &query.region, today).await?;
    }

    let model = state.model.clone();
    let status = tokio::task::spawn_blocking(move || model.inventory_status(today, &queries)).await??;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
struct TrainResponse {
    message: &'static str,
    metrics: TrainingMetrics,
    run_id: String,
}

async fn train_model(State(state): State<AppState>) -> Result<Json<TrainResponse>, ApiError> {
    let data_path = state.data_path.clone();
    let model = state.model.clone();
    let report = tokio::task::spawn_blocking(move || {
        let records = dataset::load_sales_records(&data_path)?;
        model.train(&records)
    })
    .await??;

    Ok(Json(TrainResponse {
        message: "Model trained successfully",
        metrics: report.metrics,
        run_id: report.run_id.to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct ModelStatus {
    state: ModelState,
    model_path: String,
}

async fn model_status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(ModelStatus {
        state: state.model.state(),
        model_path: state.model.store().model_path().display().to_string(),
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &stocksense_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stocksense_core::domain::recommendation::Recommendation;
    use stocksense_core::features::FeaturePipeline;
    use stocksense_core::model::artifact::ArtifactStore;
    use std::fmt::Write as _;

    struct FixedWeather(&'static str);

    #[async_trait::async_trait]
    impl WeatherSource for FixedWeather {
        fn source_name(&self) -> &'static str {
            "fixed"
        }

        async fn condition(&self, _region: &str, _date: NaiveDate) -> Result<String, DemandError> {
            Ok(self.0.to_string())
        }
    }

    fn write_dataset(dir: &std::path::Path) -> PathBuf {
        let mut csv = String::from(
            "date,product_id,product_name,category,region,weather,is_festival,quantity_sold,current_stock,restock_threshold\n",
        );
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for (product_id, name, region, base) in [(1, "Milk", "North", 20), (2, "Rice", "South", 70)] {
            for d in 0..21 {
                let date = start + chrono::Duration::days(d);
                // Latest row of each group has no weather so the gateway must resolve it.
                let weather = if d == 20 { "" } else if d % 2 == 0 { "Sunny" } else { "Rainy" };
                let qty = base + (d % 7);
                writeln!(
                    csv,
                    "{date},{product_id},{name},Grocery,{region},{weather},False,{qty},{},50",
                    40 + d
                )
                .unwrap();
            }
        }
        let path = dir.join("sales.csv");
        std::fs::write(&path, csv).unwrap();
        path
    }

    fn state(dir: &tempfile::TempDir, weather: Option<Arc<dyn WeatherSource>>) -> AppState {
        AppState {
            model: Arc::new(DemandModel::new(
                FeaturePipeline::default(),
                ArtifactStore::new(dir.path().join("model.json")),
            )),
            weather,
            data_path: write_dataset(dir.path()),
            default_restock_threshold: 60,
        }
    }

    fn request(weather: Option<&str>, current_stock: Option<i64>) -> PredictionRequest {
        PredictionRequest {
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            product_id: 1,
            region: "North".to_string(),
            weather: weather.map(str::to_string),
            is_festival: false,
            current_stock,
        }
    }

    #[test]
    fn maps_error_kinds_to_status_codes() {
        assert_eq!(
            status_for(&DemandError::DataValidation("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&DemandError::ModelNotFound { path: PathBuf::from("m.json") }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DemandError::ExternalService {
                service: "weather",
                detail: "down".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DemandError::FeatureSchemaMismatch("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn predict_before_training_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = predict_demand(State(state(&dir, None)), Ok(Json(request(Some("Sunny"), None))))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_weather_without_lookup_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let err = predict_demand(State(state(&dir, None)), Ok(Json(request(None, None))))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn upstream_failure_detail_stays_server_side() {
        let err = ApiError::from(DemandError::ExternalService {
            service: "weatherapi",
            detail: "GET http://weather.test/v1/forecast.json?key=SECRET123 refused".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_text(response).await;
        assert!(body.contains("\"error\":\"external_service\""), "{body}");
        assert!(!body.contains("SECRET123"), "{body}");
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_validation_error() {
        use axum::extract::FromRequest;

        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/predict")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"date": "not-a-date", "product_id": 1}"#))
            .unwrap();
        let rejection = Json::<PredictionRequest>::from_request(req, &()).await.unwrap_err();

        let response = ApiError::from(rejection).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_text(response).await;
        assert!(body.contains("\"error\":\"data_validation\""), "{body}");
    }

    #[tokio::test]
    async fn train_then_predict_and_recommend() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, Some(Arc::new(FixedWeather("Sunny"))));

        let trained = train_model(State(state.clone())).await.unwrap();
        assert_eq!(trained.0.message, "Model trained successfully");
        assert!(trained.0.metrics.mse >= 0.0);

        let without_stock = predict_demand(State(state.clone()), Ok(Json(request(None, None))))
            .await
            .unwrap();
        assert_eq!(without_stock.0.recommendation, Recommendation::NotApplicable);

        let low_stock = predict_demand(State(state.clone()), Ok(Json(request(Some("Rainy"), Some(10)))))
            .await
            .unwrap();
        assert_eq!(low_stock.0.recommendation, Recommendation::Restock);

        let status = inventory_recommendations(State(state.clone())).await.unwrap();
        assert_eq!(status.0.total_items, 2);
        assert_eq!(
            status.0.low_stock_count + status.0.overstock_count
                + status
                    .0
                    .items
                    .iter()
                    .filter(|i| i.recommendation == Recommendation::StockOk)
                    .count(),
            2
        );

        let model = model_status(State(state)).await;
        assert_eq!(model.0.state, ModelState::TrainedInMemory);
    }
}
