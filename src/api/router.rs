use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::post,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::state::AppState;
use crate::config::ServerSettings;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

pub fn cors_layer(settings: &ServerSettings) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let origin = HeaderValue::from_str(settings.allowed_origin.trim())?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_LENGTH])
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE))
}

pub fn create_router(state: AppState, settings: &ServerSettings) -> Result<Router, header::InvalidHeaderValue> {
    Ok(Router::new()
        .route("/store-trade", post(handlers::store_trade))
        .layer(cors_layer(settings)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
