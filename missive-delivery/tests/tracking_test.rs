//! Open and click tracking against sent mail
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use missive_common::{RecipientId, TemplateKind};
use missive_delivery::{ClickOutcome, EnqueueRequest, OpenOutcome, QueueAdmin};
use missive_store::BackingStore;
use support::{reader, tracking_ids, world};

const BODY: &str = "<html><body>\
    <p><a href=\"https://letters.example/letters/7\">Read letter 7</a></p>\
    <p><a href=\"mailto:editor@letters.example\">Write to us</a></p>\
    <p><a href=\"https://letters.example/unsubscribe?rid=1\">Unsubscribe</a></p>\
    </body></html>";

async fn sent_body() -> (support::World, String) {
    let w = world(|_| {});
    w.directory.upsert(reader(1));
    w.processor
        .enqueue(EnqueueRequest::new(
            RecipientId(1),
            TemplateKind::AutomatedNotice,
            "Notice",
            BODY,
        ))
        .await
        .unwrap();
    w.processor.tick().await.unwrap();

    let body = w.transport.sent()[0].html_body.clone();
    (w, body)
}

#[tokio::test]
async fn test_only_content_links_are_tracked() {
    let (_w, body) = sent_body().await;

    assert_eq!(tracking_ids(&body, "click").len(), 1);
    assert_eq!(tracking_ids(&body, "open").len(), 1);
    assert!(body.contains("href=\"mailto:editor@letters.example\""));
    assert!(body.contains("href=\"https://letters.example/unsubscribe?rid=1\""));
    assert!(!body.contains("href=\"https://letters.example/letters/7\""));

    let pixel = body.find("?track=open").unwrap();
    let close = body.rfind("</body>").unwrap();
    assert!(pixel < close);
}

#[tokio::test]
async fn test_open_is_recorded_once() {
    let (w, body) = sent_body().await;
    let tracker = w.processor.tracker().unwrap();
    let id = tracking_ids(&body, "open").remove(0);

    assert_eq!(tracker.record_open(&id).await.unwrap(), OpenOutcome::Recorded);
    let first = w.store.get_tracking(&id).await.unwrap().unwrap();
    assert!(first.fired);

    w.clock.advance(chrono::Duration::hours(1));
    assert_eq!(tracker.record_open(&id).await.unwrap(), OpenOutcome::Repeat);
    let second = w.store.get_tracking(&id).await.unwrap().unwrap();
    assert_eq!(first.fired_at, second.fired_at);
}

#[tokio::test]
async fn test_click_redirects_to_stored_url_only() {
    let (w, body) = sent_body().await;
    let tracker = w.processor.tracker().unwrap();
    let id = tracking_ids(&body, "click").remove(0);

    assert_eq!(
        tracker.resolve_click(&id).await.unwrap(),
        ClickOutcome::First("https://letters.example/letters/7".to_string())
    );
    assert_eq!(
        tracker.resolve_click(&id).await.unwrap().location(),
        "https://letters.example/letters/7"
    );

    // a forged identifier never redirects off-site
    let forged = tracker
        .resolve_click("https://attacker.example")
        .await
        .unwrap();
    assert_eq!(forged, ClickOutcome::Home("https://letters.example/".to_string()));

    let unknown = tracker.resolve_click(&"f".repeat(32)).await.unwrap();
    assert_eq!(unknown.location(), tracker.home_url());
}
