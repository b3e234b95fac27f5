//! Catalog query endpoints

use crate::services::CatalogEntry;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CatalogQuery {
    pub region: Option<String>,
    /// Substring matched against code, name and description
    pub q: Option<String>,
}

/// GET /api/catalog?region=&q=
///
/// Both filters apply when both are given.
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Json<Vec<CatalogEntry>> {
    let mut entries: Vec<&CatalogEntry> = match &query.q {
        Some(term) => state.catalog.search(term),
        None => state.catalog.entries().iter().collect(),
    };
    if let Some(region) = &query.region {
        entries.retain(|entry| entry.region.eq_ignore_ascii_case(region.trim()));
    }
    Json(entries.into_iter().cloned().collect())
}

/// GET /api/catalog/states
pub async fn list_states(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.catalog.states())
}

/// GET /api/catalog/:code
pub async fn get_entry(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<CatalogEntry>> {
    let entry = state.catalog.require(&code)?;
    Ok(Json(entry.clone()))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/catalog", get(list_entries))
        .route("/api/catalog/states", get(list_states))
        .route("/api/catalog/:code", get(get_entry))
}
