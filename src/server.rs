use crate::config::AppConfig;
use crate::data;
use crate::filter::FilterState;
use crate::heatmap;
use crate::page::PageVariant;
use crate::panel::{DesktopPanel, FilterSurface, MobileSheet, PanelView, SurfaceVariant};
use crate::types::{CategoryFilter, Deal, TimeOfDay};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geojson::FeatureCollection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

pub struct AppState {
    pub config: AppConfig,
    pub access_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DealQuery {
    category: Option<String>,
    discounts: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeatmapQuery {
    time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BootstrapQuery {
    variant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PanelQuery {
    variant: Option<String>,
    category: Option<String>,
    time: Option<String>,
    heatmap: Option<bool>,
    discounts: Option<bool>,
    colleges: Option<bool>,
    selected: Option<u32>,
}

#[derive(Serialize)]
pub struct HeatmapResponse {
    time: TimeOfDay,
    intensity: f64,
    paint: Map<String, Value>,
}

#[derive(Serialize)]
pub struct BootstrapResponse {
    variant: PageVariant,
    interactive: bool,
    has_access_token: bool,
    #[serde(flatten)]
    options: crate::engine::EngineOptions,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn parse<T: FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>, ApiError> {
    value
        .map(|v| v.parse::<T>().map_err(|e| ApiError(StatusCode::BAD_REQUEST, e)))
        .transpose()
}

pub fn build_app(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);
    Router::new()
        .route("/api/deals", get(deals_handler))
        .route("/api/deals.geojson", get(geojson_handler))
        .route("/api/heatmap", get(heatmap_handler))
        .route("/api/bootstrap", get(bootstrap_handler))
        .route("/api/panel", get(panel_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, access_token: String) -> Result<()> {
    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let state = Arc::new(AppState { config, access_token });
    let app = build_app(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn query_deals(category: Option<&str>, discounts: Option<bool>) -> Result<Vec<Deal>, ApiError> {
    let mut filters = FilterState::default();
    if let Some(category) = parse::<CategoryFilter>(category)? {
        filters.active_category = category;
    }
    if let Some(discounts) = discounts {
        filters.show_discounts = discounts;
    }
    Ok(filters.visible_deals())
}

async fn deals_handler(Query(params): Query<DealQuery>) -> Result<Json<Vec<Deal>>, ApiError> {
    query_deals(params.category.as_deref(), params.discounts).map(Json)
}

async fn geojson_handler(Query(params): Query<DealQuery>) -> Result<Json<FeatureCollection>, ApiError> {
    let deals = query_deals(params.category.as_deref(), params.discounts)?;
    Ok(Json(data::to_geojson(&deals)))
}

async fn heatmap_handler(Query(params): Query<HeatmapQuery>) -> Result<Json<HeatmapResponse>, ApiError> {
    let time = parse::<TimeOfDay>(params.time.as_deref())?.unwrap_or_default();
    Ok(Json(HeatmapResponse {
        time,
        intensity: time.intensity(),
        paint: heatmap::paint(time),
    }))
}

async fn bootstrap_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BootstrapQuery>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    let variant = parse::<PageVariant>(params.variant.as_deref())?.unwrap_or(PageVariant::Full);
    let options = state
        .config
        .engine_options(variant.zoom(&state.config.map), &state.access_token);
    Ok(Json(BootstrapResponse {
        variant,
        interactive: variant.is_interactive(),
        has_access_token: !state.access_token.is_empty(),
        options,
    }))
}

async fn panel_handler(Query(params): Query<PanelQuery>) -> Result<Json<PanelView>, ApiError> {
    let variant = parse::<SurfaceVariant>(params.variant.as_deref())?.unwrap_or(SurfaceVariant::Desktop);
    let mut filters = FilterState::default();
    if let Some(category) = parse::<CategoryFilter>(params.category.as_deref())? {
        filters.active_category = category;
    }
    if let Some(time) = parse::<TimeOfDay>(params.time.as_deref())? {
        filters.active_time = time;
    }
    filters.show_heatmap = params.heatmap.unwrap_or(filters.show_heatmap);
    filters.show_discounts = params.discounts.unwrap_or(filters.show_discounts);
    filters.show_colleges = params.colleges.unwrap_or(filters.show_colleges);
    if let Some(id) = params.selected {
        if !filters.select(id) {
            return Err(ApiError(StatusCode::NOT_FOUND, format!("no deal with id {id}")));
        }
    }

    let view = match variant {
        SurfaceVariant::Desktop => DesktopPanel.view(&filters),
        SurfaceVariant::Mobile => MobileSheet.view(&filters),
    };
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEALS;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        build_app(Arc::new(AppState { config: AppConfig::default(), access_token: String::new() }))
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body bytes");
        let json = serde_json::from_slice(&body).expect("json parse");
        (status, json)
    }

    #[tokio::test]
    async fn deals_filter_by_category() {
        let (status, json) = get_json("/api/deals?category=Caf%C3%A9").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json.as_array().unwrap().iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, vec!["Bean & Brew Café", "Chai Sutta Bar"]);

        let (_, json) = get_json("/api/deals").await;
        assert_eq!(json.as_array().unwrap().len(), DEALS.len());
    }

    #[tokio::test]
    async fn unknown_category_is_a_bad_request() {
        let (status, json) = get_json("/api/deals?category=Gym").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Gym"));
    }

    #[tokio::test]
    async fn geojson_weights_follow_discount() {
        let (status, json) = get_json("/api/deals.geojson?category=Print").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["type"], "FeatureCollection");
        let weights: Vec<f64> = json["features"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["properties"]["weight"].as_f64())
            .collect();
        assert_eq!(weights, vec![0.30, 0.20]);
    }

    #[tokio::test]
    async fn heatmap_paint_uses_time_factor() {
        let (_, json) = get_json("/api/heatmap?time=Morning").await;
        assert_eq!(json["intensity"], 0.6);
        assert_eq!(json["paint"][heatmap::INTENSITY][4], 0.6);
        assert_eq!(json["paint"][heatmap::OPACITY], 0.6);
    }

    #[tokio::test]
    async fn bootstrap_hides_the_token() {
        let (_, json) = get_json("/api/bootstrap?variant=preview").await;
        assert_eq!(json["zoom"], 12.0);
        assert_eq!(json["interactive"], false);
        assert_eq!(json["has_access_token"], false);
        assert!(json.get("access_token").is_none());
    }

    #[tokio::test]
    async fn mobile_panel_has_no_toggles() {
        let (_, json) = get_json("/api/panel?variant=mobile&category=Food&selected=4").await;
        assert_eq!(json["toggles"], serde_json::json!([]));
        assert_eq!(json["chip_layout"], "horizontal_scroll");
        let rows = json["deals"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r["id"] == 4 && r["selected"] == true));
    }
}
