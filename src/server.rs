//! REST API over a loaded index.
//!
//! The server owns one [`IndexHandle`]. Searches run against a snapshot, so a
//! concurrent `/reload` never blocks or tears a search in progress. Queries
//! without `top_k` use the registered [`SearchConfig`], if any.
//!
//! ## Endpoints
//!
//! - `POST /search` - Nearest records for one or more query vectors
//! - `GET /stats` - Record count and dimension
//! - `GET /verify` - Self-consistency check plus artifact status
//! - `POST /reload` - Re-read the index from disk
//!
//! ## Usage
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use secondmind::config::SearchConfig;
//! use secondmind::IndexHandle;
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let handle = web::Data::new(IndexHandle::open("vector_index").expect("index"));
//!     let search = web::Data::new(SearchConfig { default_k: 3 });
//!     HttpServer::new(move || {
//!         App::new()
//!             .app_data(handle.clone())
//!             .app_data(search.clone())
//!             .configure(secondmind::server::config)
//!     })
//!         .bind("127.0.0.1:7878")?
//!         .run()
//!         .await
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::IndexError;
use crate::handle::IndexHandle;
use crate::index::SearchHit;
use crate::persist::{self, ArtifactStatus};
use crate::transcript::Role;

// --- Request structs ---

#[derive(Deserialize)]
struct Query {
    value: Vec<f32>,
    top_k: Option<usize>,
}

#[derive(Deserialize)]
struct SearchRequest {
    queries: Vec<Query>,
}

// --- Response structs ---

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultGroup>,
}

#[derive(Serialize)]
struct SearchResultGroup {
    matches: Vec<MatchResult>,
    message: String,
}

#[derive(Serialize)]
struct MatchResult {
    position: usize,
    sequence_id: u64,
    role: Role,
    text: String,
    distance: f32,
    score: f32,
}

impl From<SearchHit> for MatchResult {
    fn from(hit: SearchHit) -> Self {
        MatchResult {
            position: hit.position,
            score: hit.score(),
            distance: hit.distance,
            sequence_id: hit.metadata.sequence_id,
            role: hit.metadata.role,
            text: hit.metadata.text,
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    n: usize,
    d: Option<usize>,
    dir: Option<String>,
}

#[derive(Serialize)]
struct ReloadResponse {
    n: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    artifacts: Vec<ArtifactStatus>,
}

fn status_for(error: &IndexError) -> StatusCode {
    match error {
        IndexError::IndexNotFound { .. } => StatusCode::NOT_FOUND,
        IndexError::DimensionMismatch { .. } | IndexError::ArityMismatch { .. } | IndexError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &IndexError, artifacts: Vec<ArtifactStatus>) -> HttpResponse {
    HttpResponse::build(status_for(error)).json(ErrorResponse { error: error.to_string(), artifacts })
}

fn blocking_failed(e: actix_web::error::BlockingError) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse { error: e.to_string(), artifacts: Vec::new() })
}

// --- Handlers ---

async fn search_handler(
    handle: web::Data<IndexHandle>,
    search: Option<web::Data<SearchConfig>>,
    body: web::Json<SearchRequest>,
) -> impl Responder {
    let default_k = search.map_or_else(|| SearchConfig::default().default_k, |s| s.default_k);
    let index = handle.snapshot();

    let results = body
        .into_inner()
        .queries
        .into_iter()
        .map(|query| match index.search(&query.value, query.top_k.unwrap_or(default_k)) {
            Ok(hits) => SearchResultGroup {
                matches: hits.into_iter().map(MatchResult::from).collect(),
                message: "Search Success".to_string(),
            },
            Err(e) => {
                debug!(error = %e, "search query rejected");
                SearchResultGroup { matches: Vec::new(), message: e.to_string() }
            }
        })
        .collect();

    HttpResponse::Ok().json(SearchResponse { results })
}

async fn stats_handler(handle: web::Data<IndexHandle>) -> impl Responder {
    let index = handle.snapshot();
    HttpResponse::Ok().json(StatsResponse {
        n: index.len(),
        d: index.dimension(),
        dir: handle.dir().map(|d| d.display().to_string()),
    })
}

async fn verify_handler(handle: web::Data<IndexHandle>) -> impl Responder {
    let Some(dir) = handle.dir().map(|d| d.to_path_buf()) else {
        return HttpResponse::Ok().json(persist::verify(&handle.snapshot()));
    };

    let checked = dir.clone();
    match web::block(move || persist::verify_path(checked)).await {
        Ok(Ok(report)) if report.is_healthy() => HttpResponse::Ok().json(report),
        Ok(Ok(report)) => HttpResponse::InternalServerError().json(report),
        Ok(Err(e)) => {
            warn!(path = %dir.display(), error = %e, "verification failed");
            let artifacts = persist::artifact_status(&dir);
            error_response(&e, artifacts)
        }
        Err(e) => blocking_failed(e),
    }
}

async fn reload_handler(handle: web::Data<IndexHandle>) -> impl Responder {
    let handle = handle.into_inner();
    match web::block(move || handle.reload()).await {
        Ok(Ok(n)) => HttpResponse::Ok().json(ReloadResponse { n }),
        Ok(Err(e)) => {
            warn!(error = %e, "reload failed, keeping the current index");
            error_response(&e, Vec::new())
        }
        Err(e) => blocking_failed(e),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/search").route(web::post().to(search_handler)))
       .service(web::resource("/stats").route(web::get().to(stats_handler)))
       .service(web::resource("/verify").route(web::get().to(verify_handler)))
       .service(web::resource("/reload").route(web::post().to(reload_handler)));
}
