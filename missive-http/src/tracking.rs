//! Open pixel and click redirect handlers.
//!
//! Both endpoints always answer: a tracking failure still serves the pixel,
//! and a click that cannot be resolved goes to the home page. Redirect
//! targets only ever come from stored tracking rows.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use missive_delivery::{ClickOutcome, Tracker};
use serde::Deserialize;

use crate::server::AppState;

/// A 1x1 transparent GIF
pub const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, max-age=0";

#[derive(Debug, Deserialize)]
pub(crate) struct TrackQuery {
    track: Option<String>,
    id: Option<String>,
}

pub(crate) async fn query_handler(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> Response {
    let id = query.id.unwrap_or_default();
    match query.track.as_deref() {
        Some("open") => open(state.tracker.as_deref(), &id).await,
        Some("click") => click(state.tracker.as_deref(), &id).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub(crate) async fn open_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    open(state.tracker.as_deref(), &id).await
}

pub(crate) async fn click_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    click(state.tracker.as_deref(), &id).await
}

async fn open(tracker: Option<&Tracker>, id: &str) -> Response {
    if let Some(tracker) = tracker {
        match tracker.record_open(id).await {
            Ok(outcome) => tracing::debug!(?outcome, "Open pixel served"),
            Err(e) => tracing::warn!("Failed to record open: {e}"),
        }
    }

    pixel()
}

async fn click(tracker: Option<&Tracker>, id: &str) -> Response {
    let Some(tracker) = tracker else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let location = match tracker.resolve_click(id).await {
        Ok(outcome) => {
            if matches!(outcome, ClickOutcome::Home(_)) {
                tracing::debug!("Unknown click identifier, redirecting home");
            }
            outcome.location().to_string()
        }
        Err(e) => {
            tracing::warn!("Failed to resolve click: {e}");
            tracker.home_url().to_string()
        }
    };

    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.as_str()),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
    )
        .into_response()
}

fn pixel() -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        TRANSPARENT_GIF,
    )
        .into_response()
}
