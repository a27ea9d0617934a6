use crate::database::Database;
use crate::dataset::{Dataset, LineRef};
use crate::results::{ExtractOptions, Hit};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

type SharedState = Arc<AppState>;

const DEFAULT_LIST_COUNT: i64 = 10;
const FUZZY_COMPLETE_LIMIT: usize = 50;
const DEFAULT_TOLERANCE: i64 = 2;

/// Everything a request worker needs: the frozen database and the dataset
/// stores its meta references resolve through.
pub struct AppState {
    pub database: Database<LineRef>,
    pub datasets: Vec<Dataset>,
    pub name_field: String,
}

impl AppState {
    fn payload(&self, hit: Hit) -> Result<String, QueryError> {
        let LineRef { dataset, line } = *self.database.meta(hit.id);
        self.datasets[dataset].line(line).map_err(QueryError::Dataset)
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
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

/// Binds the listener and serves queries until SIGINT/SIGTERM.
///
/// The abort flag is flipped alongside the graceful shutdown so cooperating
/// loaders stop too.
pub async fn serve(
    state: SharedState,
    config: WebConfig,
    abort: Arc<AtomicBool>,
) -> Result<(), WebError> {
    let router = build_router(state);
    info!(%config.addr, "binding HTTP listener");
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(abort))
        .await?;
    info!("HTTP server exited");
    Ok(())
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/exact", get(exact))
        .route("/exact/list", get(exact_list))
        .route("/complete", get(complete))
        .route("/complete/list", get(complete_list))
        .route("/fuzzy", get(fuzzy))
        .route("/fuzzy/list", get(fuzzy_list))
        .route("/fuzzycomplete", get(fuzzy_complete))
        .route("/fuzzycomplete/list", get(fuzzy_complete_list))
        .route("/info", get(info_endpoint))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET])
                .allow_headers([header::CONTENT_TYPE]),
        )
}

async fn shutdown_signal(abort: Arc<AtomicBool>) {
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
    abort.store(true, Ordering::Relaxed);
    info!("shutdown signal received");
}

#[derive(Debug)]
enum QueryError {
    MissingQuery,
    NoMatches,
    Dataset(io::Error),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        match self {
            QueryError::MissingQuery => {
                (StatusCode::BAD_REQUEST, "missing query parameter q").into_response()
            }
            QueryError::NoMatches => (StatusCode::NOT_FOUND, "no matches").into_response(),
            QueryError::Dataset(err) => {
                tracing::error!(%err, "dataset read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "dataset read error").into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    page: Option<String>,
    count: Option<String>,
    tol: Option<String>,
}

impl SearchParams {
    fn query(&self) -> Result<&str, QueryError> {
        self.q.as_deref().ok_or(QueryError::MissingQuery)
    }

    fn page(&self) -> usize {
        coerce(self.page.as_deref(), 0)
    }

    fn count(&self) -> usize {
        coerce(self.count.as_deref(), DEFAULT_LIST_COUNT)
    }

    fn tolerance(&self) -> i32 {
        coerce(self.tol.as_deref(), DEFAULT_TOLERANCE) as i32
    }
}

/// Numeric query parameter with `stoi`-like laxness: absent uses the
/// default, unparsable becomes 0, negatives clamp to 0.
fn coerce(value: Option<&str>, default: i64) -> usize {
    value
        .map(|raw| raw.trim().parse::<i64>().unwrap_or(0))
        .unwrap_or(default)
        .max(0) as usize
}

fn json_body(payload: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
}

/// Raw meta payload of the first hit, or 404.
fn single_response(state: &AppState, hits: &[Hit]) -> Result<Response, QueryError> {
    let hit = hits.first().ok_or(QueryError::NoMatches)?;
    Ok(json_body(state.payload(*hit)?))
}

/// JSON array literal of meta payloads; empty lists are `[]`.
fn list_response(state: &AppState, hits: &[Hit]) -> Result<Response, QueryError> {
    if hits.is_empty() {
        return Ok(json_body("[]".to_owned()));
    }
    let mut body = String::from("[\n");
    for (pos, hit) in hits.iter().enumerate() {
        body.push('\t');
        body.push_str(&state.payload(*hit)?);
        body.push_str(if pos + 1 < hits.len() { ",\n" } else { "\n" });
    }
    body.push(']');
    Ok(json_body(body))
}

async fn exact(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state.database.exact_search(query, 0, 1);
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "exact search"
    );
    single_response(&state, results.best())
}

async fn exact_list(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state
        .database
        .exact_search(query, params.page(), params.count());
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "exact search"
    );
    list_response(&state, &results.all())
}

async fn complete(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state
        .database
        .completion_search(query, params.page(), params.count());
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "completion search"
    );
    single_response(&state, results.best())
}

async fn complete_list(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state
        .database
        .completion_search(query, params.page(), params.count());
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "completion search"
    );
    list_response(&state, &results.all())
}

async fn fuzzy(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let exact = state.database.exact_search(query, 0, 1);
    let results = if exact.is_empty() {
        state.database.fuzzy_search(query, 0)
    } else {
        exact
    };
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fuzzy search"
    );
    single_response(&state, results.best())
}

async fn fuzzy_list(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let exact = state.database.exact_search(query, 0, 0);
    let results = if exact.is_empty() {
        state.database.fuzzy_search(query, 0)
    } else {
        exact
    };
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fuzzy search"
    );
    list_response(&state, results.best())
}

async fn fuzzy_complete(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state.database.fuzzy_completion_search(query);
    let best = results.extract(ExtractOptions {
        max_count: 1,
        length_sort: true,
        ..Default::default()
    });
    info!(
        query,
        hits = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fuzzy completion"
    );
    single_response(&state, &best)
}

async fn fuzzy_complete_list(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, QueryError> {
    let query = params.query()?;
    let started = Instant::now();
    let results = state.database.fuzzy_completion_search(query);
    let extracted = results.extract(ExtractOptions {
        max_count: FUZZY_COMPLETE_LIMIT,
        length_sort: true,
        distance_range: params.tolerance(),
        ..Default::default()
    });
    info!(
        query,
        hits = extracted.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fuzzy completion"
    );
    list_response(&state, &extracted)
}

async fn info_endpoint(State(state): State<SharedState>) -> impl IntoResponse {
    let options = state.database.options();
    let datasets: Vec<_> = state
        .datasets
        .iter()
        .map(|dataset| {
            json!({
                "path": dataset.path().display().to_string(),
                "mode": dataset.mode().to_string(),
                "lines": dataset.len(),
            })
        })
        .collect();
    Json(json!({
        "ngram_size": options.ngram_size.width(),
        "first_letter": options.first_letter,
        "result_limit": options.result_limit,
        "bucket_cap": options.max_bucket_size,
        "name_field": state.name_field,
        "records": state.database.len(),
        "tokens": state.database.token_count(),
        "datasets": datasets,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseBuilder, DatabaseOptions};
    use crate::dataset::StorageMode;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn state_from_ndjson(contents: &str) -> (Arc<AppState>, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file.flush().expect("flush fixture");

        let abort = AtomicBool::new(false);
        let mut builder = DatabaseBuilder::new(DatabaseOptions::default());
        let dataset = Dataset::open(file.path(), StorageMode::Memory, &abort, |line, text| {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text)
                && let Some(name) = value.get("name").and_then(|v| v.as_str())
            {
                builder.add(name, LineRef { dataset: 0, line });
            }
        })
        .expect("load fixture");

        let state = Arc::new(AppState {
            database: builder.build(),
            datasets: vec![dataset],
            name_field: "name".to_owned(),
        });
        (state, file)
    }

    async fn get_response(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let router = build_router(state);
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    const BURGERS: &str = "{\"name\":\"Hamburger\"}\n{\"name\":\"Cheeseburger\"}\n";

    #[tokio::test]
    async fn exact_hit_returns_the_raw_line() {
        let (state, _file) =
            state_from_ndjson("{\"name\":\"Alice\",\"x\":1}\n{\"name\":\"bob\",\"x\":2}\n");
        let (status, body) = get_response(state, "/exact?q=alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Alice\",\"x\":1}");
    }

    #[tokio::test]
    async fn exact_miss_is_404_no_matches() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, body) = get_response(state, "/exact?q=zzz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "no matches");
    }

    #[tokio::test]
    async fn missing_query_parameter_is_400() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, body) = get_response(state.clone(), "/fuzzy").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing query parameter q");
        let (status, _) = get_response(state, "/complete/list").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn completion_list_is_a_json_array_of_lines() {
        let (state, _file) =
            state_from_ndjson("{\"name\":\"Alice\",\"x\":1}\n{\"name\":\"bob\",\"x\":2}\n");
        let (status, body) = get_response(state, "/complete/list?q=a&count=10&page=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[\n\t{\"name\":\"Alice\",\"x\":1}\n]");
    }

    #[tokio::test]
    async fn empty_list_query_returns_empty_array() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, body) = get_response(state, "/exact/list?q=nothing").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn fuzzy_tolerates_a_deletion() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, body) = get_response(state, "/fuzzy?q=hambuger").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Hamburger\"}");
    }

    #[tokio::test]
    async fn fuzzy_tolerates_a_transposition() {
        let (state, _file) = state_from_ndjson("{\"name\":\"receive\"}\n{\"name\":\"deceive\"}\n");
        let (status, body) = get_response(state, "/fuzzy?q=recieve").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"receive\"}");
    }

    #[tokio::test]
    async fn fuzzy_prefers_an_exact_match() {
        let (state, _file) = state_from_ndjson("{\"name\":\"cheese\"}\n{\"name\":\"Chees\"}\n");
        let (status, body) = get_response(state, "/fuzzy?q=chees").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Chees\"}");
    }

    #[tokio::test]
    async fn fuzzy_complete_list_ranks_by_distance_then_length() {
        let (state, _file) = state_from_ndjson(
            "{\"name\":\"progress\"}\n{\"name\":\"programming\"}\n{\"name\":\"progeny\"}\n",
        );
        let (status, body) = get_response(state, "/fuzzycomplete/list?q=prog&tol=1").await;
        assert_eq!(status, StatusCode::OK);
        let progeny = body.find("progeny").unwrap();
        let progress = body.find("progress").unwrap();
        let programming = body.find("programming").unwrap();
        assert!(progeny < progress && progress < programming);
    }

    #[tokio::test]
    async fn fuzzy_complete_single_returns_the_shortest_best() {
        let (state, _file) = state_from_ndjson(
            "{\"name\":\"progress\"}\n{\"name\":\"programming\"}\n{\"name\":\"progeny\"}\n",
        );
        let (status, body) = get_response(state, "/fuzzycomplete?q=prog").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"progeny\"}");
    }

    #[tokio::test]
    async fn cors_header_is_present_on_responses() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let router = build_router(state);
        let response = router
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .map(|v| v.to_str().unwrap()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn info_reports_options_and_counts() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, body) = get_response(state, "/info").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["ngram_size"], 2);
        assert_eq!(value["records"], 2);
        assert_eq!(value["datasets"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn records_resolve_across_multiple_datasets() {
        let mut first = NamedTempFile::new().unwrap();
        first.write_all(b"{\"name\":\"Alice\"}\n").unwrap();
        first.flush().unwrap();
        let mut second = NamedTempFile::new().unwrap();
        second.write_all(b"{\"name\":\"Bob\"}\n").unwrap();
        second.flush().unwrap();

        let abort = AtomicBool::new(false);
        let mut builder = DatabaseBuilder::new(DatabaseOptions::default());
        let mut datasets = Vec::new();
        for file in [&first, &second] {
            let id = datasets.len();
            let dataset = Dataset::open(file.path(), StorageMode::Memory, &abort, |line, text| {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(text)
                    && let Some(name) = value.get("name").and_then(|v| v.as_str())
                {
                    builder.add(name, LineRef { dataset: id, line });
                }
            })
            .unwrap();
            datasets.push(dataset);
        }
        let state = Arc::new(AppState {
            database: builder.build(),
            datasets,
            name_field: "name".to_owned(),
        });

        let (status, body) = get_response(state.clone(), "/exact?q=bob").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Bob\"}");
        let (status, body) = get_response(state, "/exact?q=alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Alice\"}");
    }

    #[tokio::test]
    async fn disk_backed_datasets_serve_the_original_lines() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(BURGERS.as_bytes()).unwrap();
        file.flush().unwrap();

        let abort = AtomicBool::new(false);
        let mut builder = DatabaseBuilder::new(DatabaseOptions::default());
        let dataset = Dataset::open(file.path(), StorageMode::Disk, &abort, |line, text| {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text)
                && let Some(name) = value.get("name").and_then(|v| v.as_str())
            {
                builder.add(name, LineRef { dataset: 0, line });
            }
        })
        .unwrap();
        let state = Arc::new(AppState {
            database: builder.build(),
            datasets: vec![dataset],
            name_field: "name".to_owned(),
        });

        let (status, body) = get_response(state.clone(), "/exact?q=cheeseburger").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Cheeseburger\"}");
        // A second request re-seeks the shared handle.
        let (status, body) = get_response(state, "/exact?q=hamburger").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"name\":\"Hamburger\"}");
    }

    #[tokio::test]
    async fn non_numeric_pagination_is_coerced_to_zero() {
        let (state, _file) = state_from_ndjson(BURGERS);
        let (status, _) = get_response(state, "/exact/list?q=hamburger&page=abc&count=xyz").await;
        // count coerces to 0, meaning one page of everything.
        assert_eq!(status, StatusCode::OK);
    }
}
