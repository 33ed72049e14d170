//! Digest and bulk campaign runs driven through scheduled continuations
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::collections::BTreeSet;

use chrono::Duration;
use missive_common::{
    Cadence, CampaignId, Clock, ContentId, QueueItemId, QueueStatus, RecipientId, TemplateKind,
};
use missive_delivery::{BatchOutcome, NewCampaign, QueueAdmin};
use missive_store::{
    BackingStore, CampaignContent, CampaignStatus, DeliveryLogEntry, DeliveryOutcome, ItemFilter,
    QueueItem, TickPayload,
};
use pretty_assertions::assert_eq;
use support::{letter, reader, world};

async fn pending_for(w: &support::World, recipient: u64) -> Vec<QueueItem> {
    w.store
        .list_items(&ItemFilter {
            statuses: vec![QueueStatus::Pending],
            recipient_id: Some(RecipientId(recipient)),
            ..ItemFilter::default()
        })
        .await
        .unwrap()
}

async fn mark_delivered(w: &support::World, recipient: u64, content: &[u64]) {
    w.store
        .append_delivery_log(&DeliveryLogEntry {
            item_id: QueueItemId::generate(),
            recipient_id: RecipientId(recipient),
            content_ids: content.iter().copied().map(ContentId).collect(),
            campaign_id: None,
            template_kind: TemplateKind::WeeklyDigest,
            outcome: DeliveryOutcome::Sent,
            error: None,
            logged_at: w.clock.now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_digest_skips_sent_and_queued_letters() {
    let w = world(|_| {});
    let base = w.clock.now() - Duration::days(30);
    for id in 1..=5 {
        w.content.publish(letter(id, base));
    }
    w.directory.upsert(reader(1));
    w.directory.upsert(reader(2));

    mark_delivered(&w, 1, &[1, 2, 3]).await;
    mark_delivered(&w, 2, &[1, 2, 3, 4, 5]).await;

    w.processor.start_digest(Cadence::Weekly).await.unwrap();
    assert_eq!(w.processor.run_scheduled().await.unwrap(), 1);

    let digest = pending_for(&w, 1).await;
    assert_eq!(digest.len(), 1);
    assert_eq!(digest[0].template_kind, TemplateKind::WeeklyDigest);
    let chosen: BTreeSet<_> = digest[0].content_ids().into_iter().collect();
    assert_eq!(chosen, BTreeSet::from([ContentId(4), ContentId(5)]));

    let caught_up = pending_for(&w, 2).await;
    assert_eq!(caught_up.len(), 1);
    assert_eq!(caught_up[0].template_kind, TemplateKind::AllCaughtUp);

    // a second run while those are still queued adds nothing
    w.processor.start_digest(Cadence::Weekly).await.unwrap();
    w.processor.run_scheduled().await.unwrap();
    assert_eq!(pending_for(&w, 1).await.len(), 1);
    assert_eq!(pending_for(&w, 2).await.len(), 1);
}

#[tokio::test]
async fn test_digest_respects_cadence_and_consent() {
    let w = world(|_| {});
    let base = w.clock.now() - Duration::days(1);
    w.content.publish(letter(1, base));

    let mut daily = reader(1);
    daily.frequency = Some(Cadence::Daily);
    let mut unconsented = reader(2);
    unconsented.consent_confirmed = false;
    w.directory.upsert(daily);
    w.directory.upsert(unconsented);
    w.directory.upsert(reader(3));

    w.processor.start_digest(Cadence::Weekly).await.unwrap();
    w.processor.run_scheduled().await.unwrap();

    assert!(pending_for(&w, 1).await.is_empty());
    assert!(pending_for(&w, 2).await.is_empty());
    assert_eq!(pending_for(&w, 3).await.len(), 1);
}

#[tokio::test]
async fn test_digest_pages_continue_until_short_page() {
    let w = world(|processor| processor.campaign.digest_page_size = 2);
    let base = w.clock.now() - Duration::days(1);
    w.content.publish(letter(1, base));
    for id in 1..=3 {
        w.directory.upsert(reader(id));
    }

    w.processor.start_digest(Cadence::Weekly).await.unwrap();
    w.processor.run_scheduled().await.unwrap();
    assert_eq!(pending_for(&w, 3).await.len(), 0);

    let ticks = w.store.list_ticks().await.unwrap();
    assert_eq!(ticks.len(), 1);
    assert!(matches!(ticks[0].payload, TickPayload::DigestPage { page: 1, .. }));

    w.clock.advance(Duration::seconds(5));
    w.processor.run_scheduled().await.unwrap();
    assert_eq!(pending_for(&w, 3).await.len(), 1);
    assert!(w.store.list_ticks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_digest_cadences_start_runs_on_their_own() {
    let w = world(|_| {});
    w.content.publish(letter(1, w.clock.now() - Duration::days(2)));
    w.directory.upsert(reader(1));

    let digests = w.processor.digests().unwrap();
    assert_eq!(digests.ensure_schedule().await.unwrap(), 3);
    assert_eq!(digests.ensure_schedule().await.unwrap(), 0);

    w.clock.advance(Duration::days(7) + Duration::seconds(1));
    // the daily and weekly cadences fire and queue their first pages
    assert_eq!(w.processor.run_scheduled().await.unwrap(), 2);
    w.processor.run_scheduled().await.unwrap();

    let digest = pending_for(&w, 1).await;
    assert_eq!(digest.len(), 1);
    assert_eq!(digest[0].template_kind, TemplateKind::WeeklyDigest);

    let cadences: Vec<_> = w
        .store
        .list_ticks()
        .await
        .unwrap()
        .into_iter()
        .filter(|tick| matches!(tick.payload, TickPayload::DigestCadence { .. }))
        .collect();
    assert_eq!(cadences.len(), 3);
    assert!(cadences.iter().all(|tick| tick.due_at > w.clock.now()));
}

#[tokio::test]
async fn test_disabled_digest_schedule_clears_cadences() {
    let w = world(|processor| processor.campaign.digest_schedule.enabled = false);
    w.store
        .schedule_tick(
            w.clock.now(),
            TickPayload::DigestCadence {
                cadence: Cadence::Daily,
            },
        )
        .await
        .unwrap();

    let digests = w.processor.digests().unwrap();
    assert_eq!(digests.ensure_schedule().await.unwrap(), 0);
    assert!(w.store.list_ticks().await.unwrap().is_empty());
}

fn newsletter(name: &str) -> NewCampaign {
    NewCampaign {
        name: name.to_string(),
        variant_a: CampaignContent {
            subject: "Spring letters".to_string(),
            body: "<p>Hello {{name}}</p>".to_string(),
        },
        variant_b: None,
        priority: None,
    }
}

async fn campaign_items(w: &support::World, id: CampaignId) -> Vec<QueueItem> {
    w.store
        .list_items(&ItemFilter {
            campaign_id: Some(id),
            ..ItemFilter::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_campaign_runs_in_batches_to_completion() {
    let w = world(|processor| processor.campaign.batch_size = 2);
    for id in 1..=3 {
        w.directory.upsert(reader(id));
    }

    let id = w.processor.create_campaign(newsletter("spring")).await.unwrap();
    w.processor.start_campaign(id, false).await.unwrap();

    w.processor.run_scheduled().await.unwrap();
    assert_eq!(campaign_items(&w, id).await.len(), 2);

    w.clock.advance(Duration::seconds(5));
    w.processor.run_scheduled().await.unwrap();
    assert_eq!(campaign_items(&w, id).await.len(), 3);

    w.clock.advance(Duration::seconds(5));
    w.processor.run_scheduled().await.unwrap();

    let run = w.store.get_campaign(id).await.unwrap().unwrap();
    assert_eq!(run.status, CampaignStatus::Sent);
    assert_eq!(run.queued_count, 3);
    assert_eq!(run.total_recipients, 3);
    assert!(run.token.is_none());
    assert!(run.completed_at.is_some());

    let items = campaign_items(&w, id).await;
    assert!(items.iter().all(|i| i.template_kind == TemplateKind::CustomCampaign));
    assert!(items.iter().any(|i| i.body.contains("Hello Reader 2")));
    assert!(items.iter().all(|i| !i.body.contains("{{")));
}

#[tokio::test]
async fn test_stop_invalidates_outstanding_ticks() {
    let w = world(|processor| processor.campaign.batch_size = 2);
    for id in 1..=5 {
        w.directory.upsert(reader(id));
    }

    let id = w.processor.create_campaign(newsletter("stoppable")).await.unwrap();
    w.processor.start_campaign(id, false).await.unwrap();
    w.processor.run_scheduled().await.unwrap();

    let old_token = match &w.store.list_ticks().await.unwrap()[0].payload {
        TickPayload::CampaignBatch { token, .. } => token.clone(),
        other => unreachable!("{other:?}"),
    };

    w.processor.stop_campaign(id).await.unwrap();
    assert!(w.store.list_ticks().await.unwrap().is_empty());

    let campaigns = w.processor.campaigns().unwrap();
    assert_eq!(
        campaigns.run_batch(id, 2, &old_token).await.unwrap(),
        BatchOutcome::Ignored
    );
    assert_eq!(campaign_items(&w, id).await.len(), 2);

    // resuming keeps the offset but mints a new token
    w.processor.start_campaign(id, true).await.unwrap();
    assert_eq!(
        campaigns.run_batch(id, 2, &old_token).await.unwrap(),
        BatchOutcome::Ignored
    );
    w.processor.run_scheduled().await.unwrap();

    let items = campaign_items(&w, id).await;
    assert_eq!(items.len(), 4);
    let recipients: BTreeSet<_> = items.iter().map(|i| i.recipient_id.get()).collect();
    assert_eq!(recipients, BTreeSet::from([1, 2, 3, 4]));
}

#[tokio::test]
async fn test_failed_requeue_does_not_drop_later_ticks() {
    let w = world(|processor| processor.campaign.batch_size = 2);
    for id in 1..=3 {
        w.directory.upsert(reader(id));
    }

    let first = w.processor.create_campaign(newsletter("first")).await.unwrap();
    let second = w.processor.create_campaign(newsletter("second")).await.unwrap();
    w.processor.start_campaign(first, false).await.unwrap();
    w.clock.advance(Duration::seconds(1));
    w.processor.start_campaign(second, false).await.unwrap();
    w.clock.advance(Duration::seconds(1));

    // the first batch fails, and so does putting it back
    w.flaky.fail_campaign_reads(1);
    w.flaky.fail_tick_writes(1);

    assert_eq!(w.processor.run_scheduled().await.unwrap(), 2);
    assert!(campaign_items(&w, first).await.is_empty());
    assert_eq!(campaign_items(&w, second).await.len(), 2);

    let run = w.store.get_campaign(second).await.unwrap().unwrap();
    assert_eq!(run.next_offset, 2);
    assert_eq!(w.store.list_ticks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_batch_retry_continues_from_advanced_offset() {
    let w = world(|processor| processor.campaign.batch_size = 2);
    for id in 1..=3 {
        w.directory.upsert(reader(id));
    }

    let id = w.processor.create_campaign(newsletter("resilient")).await.unwrap();
    w.processor.start_campaign(id, false).await.unwrap();

    // the batch commits, then scheduling its successor fails
    w.flaky.fail_tick_writes(1);
    w.processor.run_scheduled().await.unwrap();
    assert_eq!(campaign_items(&w, id).await.len(), 2);

    let ticks = w.store.list_ticks().await.unwrap();
    assert_eq!(ticks.len(), 1);
    assert!(matches!(
        ticks[0].payload,
        TickPayload::CampaignBatch { offset: 2, .. }
    ));

    w.clock.advance(Duration::seconds(5));
    w.processor.run_scheduled().await.unwrap();
    w.clock.advance(Duration::seconds(5));
    w.processor.run_scheduled().await.unwrap();

    let run = w.store.get_campaign(id).await.unwrap().unwrap();
    assert_eq!(run.status, CampaignStatus::Sent);
    assert_eq!(run.queued_count, 3);
    assert_eq!(campaign_items(&w, id).await.len(), 3);
}

#[tokio::test]
async fn test_ab_variants_split_by_recipient_parity() {
    let w = world(|_| {});
    for id in 1..=4 {
        w.directory.upsert(reader(id));
    }

    let mut campaign = newsletter("ab");
    campaign.variant_b = Some(CampaignContent {
        subject: "Autumn letters".to_string(),
        body: "<p>Hi {{name}}</p>".to_string(),
    });
    let id = w.processor.create_campaign(campaign).await.unwrap();
    w.processor.start_campaign(id, false).await.unwrap();
    w.processor.run_scheduled().await.unwrap();

    for item in campaign_items(&w, id).await {
        let expected = if item.recipient_id.get() % 2 == 1 {
            "Autumn letters"
        } else {
            "Spring letters"
        };
        assert_eq!(item.subject, expected);
    }
}

#[tokio::test]
async fn test_cancel_campaign_cancels_pending_items() {
    let w = world(|_| {});
    for id in 1..=3 {
        w.directory.upsert(reader(id));
    }

    let id = w.processor.create_campaign(newsletter("cancel")).await.unwrap();
    w.processor.start_campaign(id, false).await.unwrap();
    w.processor.run_scheduled().await.unwrap();

    assert_eq!(w.processor.cancel_campaign(id).await.unwrap(), 3);
    assert!(
        campaign_items(&w, id)
            .await
            .iter()
            .all(|i| i.status == QueueStatus::Cancelled)
    );
    assert_eq!(
        w.store.get_campaign(id).await.unwrap().unwrap().status,
        CampaignStatus::Stopped
    );
}

#[tokio::test]
async fn test_unknown_campaign_batch_is_ignored() {
    let w = world(|_| {});
    let outcome = w
        .processor
        .campaigns()
        .unwrap()
        .run_batch(CampaignId(99), 0, "nothing")
        .await
        .unwrap();
    assert_eq!(outcome, BatchOutcome::Ignored);
}
