// Facet Timeline - Web Server
// Read-only REST API over the timeline database

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use facet_timeline::{
    calculate_ratios, get_events_for_entity, list_entities, load_timeline, open_database,
    CurrentFact, FactVersion, NaturalKey, Period, PeriodSelector, PeriodType, ReconcileConfig,
    SourceFiling, StatementType, Timeline,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<ReconcileConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::error(message))).into_response()
}

/// Entity summary (status view)
#[derive(Serialize)]
struct EntityResponse {
    entity_id: String,
    state: String,
    revision: u64,
    keys: usize,
    versions: usize,
    filings: usize,
    inconsistencies: usize,
    updated_at: String,
}

impl From<&Timeline> for EntityResponse {
    fn from(timeline: &Timeline) -> Self {
        Self {
            entity_id: timeline.entity_id.clone(),
            state: timeline.state().as_str().to_string(),
            revision: timeline.revision(),
            keys: timeline.key_count(),
            versions: timeline.version_count(),
            filings: timeline.filings().len(),
            inconsistencies: timeline.inconsistencies().len(),
            updated_at: timeline.updated_at.to_rfc3339(),
        }
    }
}

/// One version of a fact with what replaced it
#[derive(Serialize)]
struct VersionResponse {
    version: FactVersion,
    superseded_by: Option<SourceFiling>,
    current: bool,
}

#[derive(Serialize)]
struct HistoryResponse {
    key: NaturalKey,
    last_confirmed: SourceFiling,
    versions: Vec<VersionResponse>,
}

#[derive(Deserialize)]
struct FactsQuery {
    period_end: Option<NaiveDate>,
    period_type: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    statement: String,
    line_item: String,
    period_start: Option<NaiveDate>,
    period_end: NaiveDate,
    period_type: String,
}

#[derive(Deserialize)]
struct RatiosQuery {
    period_end: NaiveDate,
    period_type: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Load one entity's timeline, mapping lock/DB failures and misses to HTTP errors
fn with_timeline(state: &AppState, entity: &str) -> Result<Timeline, Response> {
    let conn = state
        .db
        .lock()
        .map_err(|_| fail(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"))?;

    match load_timeline(&conn, entity) {
        Ok(Some(timeline)) => Ok(timeline),
        Ok(None) => Err(fail(StatusCode::NOT_FOUND, format!("no timeline for {}", entity))),
        Err(e) => {
            log::error!("Error loading timeline {}: {:#}", entity, e);
            Err(fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn parse_period_type(raw: Option<&str>) -> Result<Option<PeriodType>, Response> {
    raw.map(|s| s.parse::<PeriodType>())
        .transpose()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, e))
}

fn parse_statement(raw: &str) -> Result<StatementType, Response> {
    raw.parse::<StatementType>()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, e))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/entities - Status of every stored timeline
async fn get_entities(State(state): State<AppState>) -> Response {
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => return fail(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"),
    };

    let ids = match list_entities(&conn) {
        Ok(ids) => ids,
        Err(e) => {
            log::error!("Error listing entities: {:#}", e);
            return fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let mut response = Vec::with_capacity(ids.len());
    for id in ids {
        match load_timeline(&conn, &id) {
            Ok(Some(timeline)) => response.push(EntityResponse::from(&timeline)),
            Ok(None) => {}
            Err(e) => {
                log::error!("Error loading timeline {}: {:#}", id, e);
                return fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }
    }

    (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
}

/// GET /api/entities/:entity - Status of one timeline
async fn get_entity(State(state): State<AppState>, Path(entity): Path<String>) -> Response {
    match with_timeline(&state, &entity) {
        Ok(timeline) => Json(ApiResponse::ok(EntityResponse::from(&timeline))).into_response(),
        Err(response) => response,
    }
}

/// GET /api/entities/:entity/facts/:statement - Current values of one statement
async fn get_facts(
    State(state): State<AppState>,
    Path((entity, statement)): Path<(String, String)>,
    Query(query): Query<FactsQuery>,
) -> Response {
    let statement = match parse_statement(&statement) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let period_type = match parse_period_type(query.period_type.as_deref()) {
        Ok(t) => t,
        Err(response) => return response,
    };
    let timeline = match with_timeline(&state, &entity) {
        Ok(t) => t,
        Err(response) => return response,
    };

    let selector = match query.period_end {
        Some(end) => PeriodSelector::EndingOn { end, period_type },
        None => PeriodSelector::Any,
    };
    let facts: Vec<CurrentFact> = timeline
        .current_facts(statement, &selector)
        .into_iter()
        .filter(|f| period_type.map_or(true, |t| f.key.period.period_type == t))
        .collect();

    Json(ApiResponse::ok(facts)).into_response()
}

/// GET /api/entities/:entity/history - Full version chain of one fact
///
/// `line_item` arrives URL-encoded since labels carry spaces and slashes.
async fn get_history(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let statement = match parse_statement(&query.statement) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let period_type = match parse_period_type(Some(&query.period_type)) {
        Ok(Some(t)) => t,
        Ok(None) => return fail(StatusCode::BAD_REQUEST, "period_type required"),
        Err(response) => return response,
    };
    let start = match (period_type, query.period_start) {
        (PeriodType::AsOf, _) => query.period_end,
        (_, Some(start)) => start,
        (_, None) => return fail(StatusCode::BAD_REQUEST, "period_start required"),
    };

    let line_item = urlencoding::decode(&query.line_item)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| query.line_item.clone());

    let timeline = match with_timeline(&state, &entity) {
        Ok(t) => t,
        Err(response) => return response,
    };

    let key = NaturalKey::new(
        &entity,
        statement,
        &line_item,
        Period::new(start, query.period_end, period_type),
    );
    let chain = match timeline.chain(&key) {
        Some(chain) => chain,
        None => return fail(StatusCode::NOT_FOUND, format!("no versions for {}", key)),
    };

    let last = chain.len() - 1;
    let versions = chain
        .versions()
        .iter()
        .enumerate()
        .map(|(i, version)| VersionResponse {
            version: version.clone(),
            superseded_by: chain.superseded_by(i).cloned(),
            current: i == last,
        })
        .collect();

    Json(ApiResponse::ok(HistoryResponse {
        key: key.clone(),
        last_confirmed: chain.last_confirmed().clone(),
        versions,
    }))
    .into_response()
}

/// GET /api/entities/:entity/ratios - Financial ratios for one period end
async fn get_ratios(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<RatiosQuery>,
) -> Response {
    let period_type = match parse_period_type(query.period_type.as_deref()) {
        Ok(t) => t.unwrap_or(PeriodType::Annual),
        Err(response) => return response,
    };
    let timeline = match with_timeline(&state, &entity) {
        Ok(t) => t,
        Err(response) => return response,
    };

    let ratios = calculate_ratios(&timeline, query.period_end, period_type, &state.config);
    Json(ApiResponse::ok(ratios)).into_response()
}

/// GET /api/entities/:entity/events - Audit trail for one entity
async fn get_events(State(state): State<AppState>, Path(entity): Path<String>) -> Response {
    let conn = match state.db.lock() {
        Ok(conn) => conn,
        Err(_) => return fail(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned"),
    };

    match get_events_for_entity(&conn, "fact", &entity) {
        Ok(events) => Json(ApiResponse::ok(events)).into_response(),
        Err(e) => {
            log::error!("Error getting events for {}: {:#}", entity, e);
            fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("🌐 Facet Timeline - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("FACET_DB").unwrap_or_else(|_| "facet_timeline.db".to_string());
    let config = match std::env::var("FACET_CONFIG") {
        Ok(path) => ReconcileConfig::from_file(path)?,
        Err(_) => ReconcileConfig::default(),
    };

    if !std::path::Path::new(&db_path).exists() {
        eprintln!("❌ Database not found at {}", db_path);
        eprintln!("   Run: facet-timeline ingest <batch.json>");
        eprintln!("   to load filings first.");
        std::process::exit(1);
    }

    let conn = open_database(&db_path)?;
    println!("✓ Database opened: {}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/entities", get(get_entities))
        .route("/entities/:entity", get(get_entity))
        .route("/entities/:entity/facts/:statement", get(get_facts))
        .route("/entities/:entity/history", get(get_history))
        .route("/entities/:entity/ratios", get(get_ratios))
        .route("/entities/:entity/events", get(get_events))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = std::env::var("FACET_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/entities", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
