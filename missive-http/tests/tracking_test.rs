//! Tracking and probe routes exercised through the router
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use missive_common::{Clock, ManualClock, QueueItemId, RecipientId};
use missive_delivery::{Tracker, TrackingConfig};
use missive_http::{HealthChecker, TRANSPARENT_GIF, router};
use missive_store::{BackingStore, MemoryBackingStore, TrackingEvent, TrackingKind};
use tower::ServiceExt;

const OPEN_ID: &str = "0123456789abcdef0123456789abcdef";
const CLICK_ID: &str = "fedcba9876543210fedcba9876543210";
const TARGET: &str = "https://letters.example/letters/42";

struct Fixture {
    router: Router,
    store: Arc<MemoryBackingStore>,
    checker: Arc<HealthChecker>,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryBackingStore::new());
    let clock = ManualClock::starting_now();
    let item = QueueItemId::generate();

    for (id, kind, url) in [
        (OPEN_ID, TrackingKind::Open, None),
        (CLICK_ID, TrackingKind::Click, Some(TARGET.to_string())),
    ] {
        store
            .insert_tracking(&TrackingEvent {
                id: id.to_string(),
                kind,
                item_id: item,
                recipient_id: RecipientId(7),
                url,
                fired: false,
                fired_at: None,
                created_at: clock.now(),
            })
            .await
            .unwrap();
    }

    let tracker = Tracker::new(
        TrackingConfig {
            secret: "http-test-secret".to_string(),
            ..TrackingConfig::default()
        },
        store.clone(),
        Arc::new(clock),
    )
    .unwrap();

    let checker = Arc::new(HealthChecker::new(100));
    Fixture {
        router: router(
            checker.clone(),
            Some(Arc::new(tracker)),
            Duration::from_secs(1),
        ),
        store,
        checker,
    }
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_open_pixel_records_once() {
    let f = fixture().await;

    let response = get(&f.router, &format!("/?track=open&id={OPEN_ID}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
    assert!(
        response.headers()[header::CACHE_CONTROL]
            .to_str()
            .unwrap()
            .contains("no-store")
    );
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], TRANSPARENT_GIF);

    let first = f.store.get_tracking(OPEN_ID).await.unwrap().unwrap();
    assert!(first.fired);

    let again = get(&f.router, &format!("/t/open/{OPEN_ID}")).await;
    assert_eq!(again.status(), StatusCode::OK);
    let second = f.store.get_tracking(OPEN_ID).await.unwrap().unwrap();
    assert_eq!(first.fired_at, second.fired_at);
}

#[tokio::test]
async fn test_unknown_open_still_gets_pixel() {
    let f = fixture().await;

    let response = get(&f.router, "/?track=open&id=not-a-real-id").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
}

#[tokio::test]
async fn test_click_redirects_to_stored_target() {
    let f = fixture().await;

    for uri in [
        format!("/?track=click&id={CLICK_ID}"),
        format!("/t/click/{CLICK_ID}"),
    ] {
        let response = get(&f.router, &uri).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], TARGET);
    }

    assert!(f.store.get_tracking(CLICK_ID).await.unwrap().unwrap().fired);
}

#[tokio::test]
async fn test_click_never_redirects_off_site() {
    let f = fixture().await;
    let home = TrackingConfig::default().home_url;

    for uri in [
        "/?track=click&id=https%3A%2F%2Fattacker.example".to_string(),
        "/?track=click".to_string(),
        format!("/t/click/{OPEN_ID}"),
        format!("/t/click/{}", "0".repeat(32)),
    ] {
        let response = get(&f.router, &uri).await;
        assert_eq!(response.status(), StatusCode::FOUND, "{uri}");
        assert_eq!(response.headers()[header::LOCATION], home.as_str(), "{uri}");
    }
}

#[tokio::test]
async fn test_probes() {
    let f = fixture().await;

    assert_eq!(get(&f.router, "/health/live").await.status(), StatusCode::OK);
    assert_eq!(
        get(&f.router, "/health/ready").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    f.checker.set_store_ready(true);
    f.checker.set_processor_ready(true);
    assert_eq!(get(&f.router, "/health/ready").await.status(), StatusCode::OK);
}
