use crate::{
    CatalogError, CatalogHandle, MedicineIndex, NoMatch, PageQuery, SearchConfig, load_catalog,
    load_catalog_or_empty,
};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;
const MAX_LIMIT: usize = 100;

pub struct AppState {
    pub catalog: CatalogHandle,
    pub search: SearchConfig,
    /// Source re-read by `POST /api/reload`.
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub catalog_path: Option<PathBuf>,
    pub search: SearchConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            catalog_path: None,
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let index = match config.catalog_path.clone() {
        Some(path) => tokio::task::spawn_blocking(move || {
            MedicineIndex::build(load_catalog_or_empty(path))
        })
        .await
        .map_err(|err| WebError::Io(std::io::Error::other(err)))?,
        None => MedicineIndex::empty(),
    };
    let records = index.len();
    let state = Arc::new(AppState {
        catalog: CatalogHandle::new(index),
        search: config.search,
        catalog_path: config.catalog_path.clone(),
    });
    let router = build_router(state);
    info!(
        %config.addr,
        records,
        catalog = ?config.catalog_path,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<NoMatch> for ApiError {
    fn from(value: NoMatch) -> Self {
        if value.is_invalid_input() {
            ApiError::bad_request(value.to_string())
        } else {
            ApiError::not_found(value.to_string())
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(value: CatalogError) -> Self {
        ApiError::internal(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/medicine", get(api_medicine))
        .route("/api/search", get(api_search))
        .route("/api/fuzzy", get(api_fuzzy))
        .route("/api/composition", get(api_composition))
        .route("/api/price", get(api_price))
        .route("/api/manufacturer", get(api_manufacturer))
        .route("/api/prescription", get(api_prescription))
        .route("/api/similar", get(api_similar))
        .route("/api/alternatives", get(api_alternatives))
        .route("/api/paginated", get(api_paginated))
        .route("/api/analyze", get(api_analyze))
        .route("/api/count", get(api_count))
        .route("/api/categories", get(api_categories))
        .route("/api/manufacturers", get(api_manufacturers))
        .route("/api/stats", get(api_stats))
        .route("/api/prefix", get(api_prefix))
        .route("/api/reload", post(api_reload))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// Results borrow the snapshot, so they are serialised before the handler returns.
fn respond<T: Serialize>(value: &T) -> Response {
    Json(value).into_response()
}

fn clamp_limit(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .ok_or_else(|| ApiError::bad_request(format!("Query parameter `{name}` is required")))
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "medsearch-web",
        "records": state.catalog.snapshot().len(),
    }))
}

#[derive(Debug, Deserialize)]
struct MedicineParams {
    name: Option<String>,
    alternatives: Option<bool>,
}

async fn api_medicine(
    State(state): State<SharedState>,
    Query(params): Query<MedicineParams>,
) -> Result<Response, ApiError> {
    let name = required(&params.name, "name")?;
    let index = state.catalog.snapshot();
    let lookup = index.get_medicine_by_name(name, params.alternatives.unwrap_or(true))?;
    Ok(respond(&lookup))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn api_search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let query = required(&params.q, "q")?;
    let limit = clamp_limit(params.limit, state.search.search_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.search_medicines(query, limit)?))
}

#[derive(Debug, Deserialize)]
struct FuzzyParams {
    q: Option<String>,
    threshold: Option<f64>,
    limit: Option<usize>,
}

async fn api_fuzzy(
    State(state): State<SharedState>,
    Query(params): Query<FuzzyParams>,
) -> Result<Response, ApiError> {
    let query = required(&params.q, "q")?;
    let threshold = params.threshold.unwrap_or(state.search.fuzzy_threshold);
    let limit = clamp_limit(params.limit, state.search.fuzzy_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.fuzzy_search_by_name(query, threshold, limit)?))
}

#[derive(Debug, Deserialize)]
struct CompositionParams {
    ingredient: Option<String>,
    limit: Option<usize>,
}

async fn api_composition(
    State(state): State<SharedState>,
    Query(params): Query<CompositionParams>,
) -> Result<Response, ApiError> {
    let ingredient = required(&params.ingredient, "ingredient")?;
    let limit = clamp_limit(params.limit, state.search.composition_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.search_by_composition(ingredient, limit)?))
}

#[derive(Debug, Deserialize)]
struct PriceParams {
    min: Option<f64>,
    max: Option<f64>,
    limit: Option<usize>,
}

async fn api_price(
    State(state): State<SharedState>,
    Query(params): Query<PriceParams>,
) -> Result<Response, ApiError> {
    let min = params.min.unwrap_or(0.0);
    let max = params.max.unwrap_or(f64::INFINITY);
    if min > max {
        return Err(ApiError::bad_request("`min` must not exceed `max`"));
    }
    let limit = clamp_limit(params.limit, state.search.price_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.filter_by_price_range(min, max, limit)?))
}

#[derive(Debug, Deserialize)]
struct ManufacturerParams {
    name: Option<String>,
    limit: Option<usize>,
}

async fn api_manufacturer(
    State(state): State<SharedState>,
    Query(params): Query<ManufacturerParams>,
) -> Result<Response, ApiError> {
    let name = required(&params.name, "name")?;
    let limit = clamp_limit(params.limit, state.search.manufacturer_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.filter_by_manufacturer(name, limit)?))
}

#[derive(Debug, Deserialize)]
struct PrescriptionParams {
    required: Option<bool>,
    limit: Option<usize>,
}

async fn api_prescription(
    State(state): State<SharedState>,
    Query(params): Query<PrescriptionParams>,
) -> Result<Response, ApiError> {
    let required = params
        .required
        .ok_or_else(|| ApiError::bad_request("Query parameter `required` is required"))?;
    let limit = clamp_limit(params.limit, state.search.prescription_limit);
    let index = state.catalog.snapshot();
    Ok(respond(
        &index.filter_by_prescription_requirement(required, limit)?,
    ))
}

#[derive(Debug, Deserialize)]
struct ReferenceParams {
    name: Option<String>,
    limit: Option<usize>,
}

async fn api_similar(
    State(state): State<SharedState>,
    Query(params): Query<ReferenceParams>,
) -> Result<Response, ApiError> {
    let name = required(&params.name, "name")?;
    let limit = clamp_limit(params.limit, state.search.similar_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.find_similar_medicines(name, limit)?))
}

async fn api_alternatives(
    State(state): State<SharedState>,
    Query(params): Query<ReferenceParams>,
) -> Result<Response, ApiError> {
    let name = required(&params.name, "name")?;
    let limit = clamp_limit(params.limit, state.search.suggestion_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.suggest_alternatives(name, limit)?))
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    q: Option<String>,
    manufacturer: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    prescription: Option<bool>,
    ingredient: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

impl PageParams {
    fn into_request(self, defaults: &SearchConfig) -> PageQuery {
        PageQuery {
            query: self.q.unwrap_or_default(),
            manufacturer: self.manufacturer.unwrap_or_default(),
            min_price: self.min_price.unwrap_or(0.0),
            max_price: self.max_price.unwrap_or(f64::INFINITY),
            prescription_required: self.prescription,
            ingredient: self.ingredient.unwrap_or_default(),
            page: self.page.unwrap_or(1).max(1),
            page_size: clamp_limit(self.page_size, defaults.page_size),
        }
    }
}

async fn api_paginated(
    State(state): State<SharedState>,
    Query(params): Query<PageParams>,
) -> Response {
    let request = params.into_request(&state.search);
    let index = state.catalog.snapshot();
    respond(&index.paginated_search(&request))
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    composition: Option<String>,
}

async fn api_analyze(
    State(state): State<SharedState>,
    Query(params): Query<AnalyzeParams>,
) -> Result<Response, ApiError> {
    let composition = params.composition.unwrap_or_default();
    let index = state.catalog.snapshot();
    Ok(respond(&index.analyze_composition(&composition)?))
}

#[derive(Debug, Deserialize)]
struct CountParams {
    composition: Option<String>,
    exact: Option<bool>,
}

async fn api_count(
    State(state): State<SharedState>,
    Query(params): Query<CountParams>,
) -> Result<Response, ApiError> {
    let composition = required(&params.composition, "composition")?;
    let index = state.catalog.snapshot();
    Ok(respond(&index.count_medicines_by_composition(
        composition,
        params.exact.unwrap_or(false),
    )?))
}

#[derive(Debug, Deserialize)]
struct CategoriesParams {
    limit: Option<usize>,
}

async fn api_categories(
    State(state): State<SharedState>,
    Query(params): Query<CategoriesParams>,
) -> Response {
    let limit = clamp_limit(params.limit, state.search.max_categories);
    let index = state.catalog.snapshot();
    respond(&index.categorize_medicines(limit))
}

async fn api_manufacturers(State(state): State<SharedState>) -> Response {
    let index = state.catalog.snapshot();
    respond(&index.get_all_manufacturers())
}

async fn api_stats(State(state): State<SharedState>) -> Response {
    let index = state.catalog.snapshot();
    respond(&index.get_medicine_statistics())
}

#[derive(Debug, Deserialize)]
struct PrefixParams {
    prefix: Option<String>,
    limit: Option<usize>,
}

async fn api_prefix(
    State(state): State<SharedState>,
    Query(params): Query<PrefixParams>,
) -> Result<Response, ApiError> {
    let prefix = required(&params.prefix, "prefix")?;
    let limit = clamp_limit(params.limit, state.search.search_limit);
    let index = state.catalog.snapshot();
    Ok(respond(&index.medicines_with_prefix(prefix, limit)?))
}

#[derive(Debug, Serialize, Deserialize)]
struct ReloadPayload {
    records: usize,
    previous_records: usize,
}

async fn api_reload(State(state): State<SharedState>) -> Result<Json<ReloadPayload>, ApiError> {
    let path = state
        .catalog_path
        .clone()
        .ok_or_else(|| ApiError::bad_request("No catalog path configured"))?;
    let built = tokio::task::spawn_blocking(move || load_catalog(path).map(MedicineIndex::build))
        .await
        .map_err(|err| ApiError::internal(format!("Catalog reload task failed: {err}")))?;
    let index = built.inspect_err(|err| {
        warn!(error = %err, "Catalog reload failed; keeping current snapshot");
    })?;
    let records = index.len();
    let previous = state.catalog.replace(index);
    info!(records, previous = previous.len(), "Reloaded catalog");
    Ok(Json(ReloadPayload {
        records,
        previous_records: previous.len(),
    }))
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use crate::Record;
    use axum::{body, body::Body, http::Request};
    use serde_json::Value;
    use std::io::Write;
    use tower::ServiceExt;

    fn fixture() -> MedicineIndex {
        MedicineIndex::build(vec![
            Record::new("Paracet 500")
                .with_manufacturer("Acme Labs")
                .with_composition("Paracetamol (500mg)")
                .with_mrp("20")
                .with_prescription("No"),
            Record::new("Paracet Plus")
                .with_manufacturer("Acme Labs")
                .with_composition("Paracetamol (500mg)+Caffeine (30mg)")
                .with_mrp("35")
                .with_prescription("No"),
            Record::new("Azee 500")
                .with_manufacturer("Cipla Ltd")
                .with_composition("Azithromycin (500mg)")
                .with_mrp("119.5")
                .with_prescription("Yes"),
        ])
    }

    fn test_state(catalog_path: Option<PathBuf>) -> SharedState {
        Arc::new(AppState {
            catalog: CatalogHandle::new(fixture()),
            search: SearchConfig::default(),
            catalog_path,
        })
    }

    fn test_router() -> Router {
        build_router(test_state(None))
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn api_medicine_exact_and_fuzzy() {
        let (status, payload) = get_json(test_router(), "/api/medicine?name=Paracet%20500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["medicine"]["Name"], "Paracet 500");
        assert_eq!(payload["medicine"]["Price_INR"], "₹20.00");
        assert!(payload.get("note").is_none());

        let (status, payload) = get_json(test_router(), "/api/medicine?name=Paracett%20500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["note"],
            "Exact medicine not found. Showing closest match: 'Paracet 500'"
        );
    }

    #[tokio::test]
    async fn missing_medicine_is_404_with_message() {
        let (status, payload) = get_json(test_router(), "/api/medicine?name=Ibuprofen").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(payload["error"], "Medicine named 'Ibuprofen' not found.");
    }

    #[tokio::test]
    async fn short_fuzzy_query_is_400() {
        let (status, payload) = get_json(test_router(), "/api/fuzzy?q=pa").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload["error"],
            "Please provide at least 3 characters for fuzzy search."
        );
        let (status, _) = get_json(test_router(), "/api/search").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_price_and_similar() {
        let (status, payload) = get_json(test_router(), "/api/price?min=0&max=25").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<_> = payload
            .as_array()
            .unwrap()
            .iter()
            .map(|medicine| medicine["Name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Paracet 500"]);

        let (status, payload) = get_json(test_router(), "/api/similar?name=Paracet%20500").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["similar_medicines"][0]["medicine"]["Name"],
            "Paracet Plus"
        );
        assert_eq!(payload["similar_medicines"][0]["similarity_score"], "0.50");
    }

    #[tokio::test]
    async fn api_paginated_reports_meta() {
        let (status, payload) =
            get_json(test_router(), "/api/paginated?q=acme&page=5&page_size=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["meta"],
            json!({"total_results": 2, "page": 2, "page_size": 1, "total_pages": 2})
        );
        assert_eq!(payload["results"][0]["Name"], "Paracet Plus");
    }

    #[tokio::test]
    async fn api_stats_and_health() {
        let (status, payload) = get_json(test_router(), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["total_medicines"], 3);
        assert_eq!(payload["prescription_count"], 1);
        assert_eq!(payload["manufacturer_counts"]["Acme Labs"], 2);

        let (status, payload) = get_json(test_router(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["records"], 3);
    }

    #[tokio::test]
    async fn api_analyze_rejects_empty_composition() {
        let (status, _) = get_json(test_router(), "/api/analyze?composition=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, payload) = get_json(
            test_router(),
            "/api/analyze?composition=Paracetamol%20(500mg)",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["ingredients"][0]["name"], "Paracetamol");
        assert_eq!(
            payload["medicines_with_this_composition"][0]["Name"],
            "Paracet 500"
        );
    }

    #[tokio::test]
    async fn reload_swaps_in_new_catalog() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"[{"Name": "Dolo 650", "MRP": "30"}]"#)
            .unwrap();
        let state = test_state(Some(file.path().to_path_buf()));
        let router = build_router(Arc::clone(&state));
        let response = router
            .oneshot(Request::post("/api/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: ReloadPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload.records, 1);
        assert_eq!(payload.previous_records, 3);
        assert!(state.catalog.snapshot().by_name("Dolo 650").is_some());
    }

    #[tokio::test]
    async fn failed_reload_keeps_current_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(Some(dir.path().join("missing.json")));
        let router = build_router(Arc::clone(&state));
        let response = router
            .oneshot(Request::post("/api/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.catalog.snapshot().len(), 3);

        let response = test_router()
            .oneshot(Request::post("/api/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
