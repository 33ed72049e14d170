#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use missive::control_handler::MissiveControlHandler;
use missive_common::{
    Cadence, Clock, ManualClock, QueueStatus, RecipientId, RecipientStatus, Signal, TemplateKind,
};
use missive_control::{
    CampaignCommand, CommandHandler, ControlClient, ControlServer, QueueCommand, Request,
    RequestCommand, Response, ResponseData, ResponsePayload, SystemCommand,
    protocol::{CampaignVariant, EnqueueSpec, FlagName, unix_seconds},
};
use missive_delivery::{
    Collaborators, DispatchProcessor,
    directory::{MemoryContentSource, MemoryRecipientDirectory},
    recipient::Recipient,
    transport::MemoryTransport,
};
use missive_store::MemoryBackingStore;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

struct Harness {
    handler: MissiveControlHandler,
    transport: Arc<MemoryTransport>,
    clock: ManualClock,
}

fn reader(id: u64) -> Recipient {
    Recipient {
        id: RecipientId(id),
        email: Some(format!("reader{id}@example.com")),
        secondary_email: None,
        display_name: Some(format!("Reader {id}")),
        status: RecipientStatus::Active,
        verified: true,
        frequency: Some(Cadence::Weekly),
        digest_opt_in: true,
        newsletter_opt_in: true,
        consent_confirmed: true,
    }
}

fn harness() -> Harness {
    let transport = Arc::new(MemoryTransport::new());
    let clock = ManualClock::starting_now();

    let mut processor = DispatchProcessor::default();
    processor
        .init(Collaborators {
            store: Arc::new(MemoryBackingStore::new()),
            recipients: Arc::new(MemoryRecipientDirectory::with_recipients([
                reader(1),
                reader(2),
                reader(3),
            ])),
            content: Arc::new(MemoryContentSource::new()),
            transport: transport.clone(),
            clock: Arc::new(clock.clone()),
        })
        .unwrap();

    Harness {
        handler: MissiveControlHandler::new(Arc::new(processor), false),
        transport,
        clock,
    }
}

async fn call(harness: &Harness, command: RequestCommand) -> Response {
    harness
        .handler
        .handle_request(Request::new(command))
        .await
        .unwrap()
}

fn data(response: Response) -> ResponseData {
    match response.payload {
        ResponsePayload::Data(data) => *data,
        other => panic!("expected data, got {other:?}"),
    }
}

fn enqueue(recipient: u64) -> RequestCommand {
    RequestCommand::Queue(QueueCommand::Enqueue(EnqueueSpec {
        recipient_id: RecipientId(recipient),
        template_kind: TemplateKind::AutomatedNotice,
        subject: "Account notice".to_string(),
        body: "<html><body><p>Hello</p></body></html>".to_string(),
        priority: None,
        scheduled_at: None,
    }))
}

#[tokio::test]
async fn enqueue_then_process_now_sends() {
    let h = harness();

    let ResponseData::Enqueued(id) = data(call(&h, enqueue(1)).await) else {
        panic!("expected an enqueued id");
    };

    let ResponseData::Tick(tick) = data(
        call(&h, RequestCommand::Queue(QueueCommand::ProcessNow)).await,
    ) else {
        panic!("expected a tick summary");
    };
    assert_eq!(tick.sent, 1);
    assert_eq!(h.transport.sent_count(), 1);

    let ResponseData::QueueList(items) = data(
        call(
            &h,
            RequestCommand::Queue(QueueCommand::List {
                status: Some(QueueStatus::Sent),
                recipient: None,
                campaign: None,
                limit: None,
            }),
        )
        .await,
    ) else {
        panic!("expected a queue listing");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, id);
    assert_eq!(items[0].attempts, 1);
}

#[tokio::test]
async fn pause_is_reported_by_health_and_blocks_ticks() {
    let h = harness();
    call(&h, enqueue(2)).await;

    assert!(
        call(&h, RequestCommand::Queue(QueueCommand::Pause))
            .await
            .is_success()
    );

    let ResponseData::QueueHealth(health) =
        data(call(&h, RequestCommand::Queue(QueueCommand::Health)).await)
    else {
        panic!("expected health");
    };
    assert!(health.paused);
    assert_eq!(health.pending, 1);

    let ResponseData::Tick(tick) = data(
        call(&h, RequestCommand::Queue(QueueCommand::ProcessNow)).await,
    ) else {
        panic!("expected a tick summary");
    };
    assert!(tick.paused);
    assert_eq!(h.transport.sent_count(), 0);

    call(&h, RequestCommand::Queue(QueueCommand::Resume)).await;
    call(&h, RequestCommand::Queue(QueueCommand::ProcessNow)).await;
    assert_eq!(h.transport.sent_count(), 1);
}

#[tokio::test]
async fn cancelling_twice_is_an_error() {
    let h = harness();
    let ResponseData::Enqueued(id) = data(call(&h, enqueue(3)).await) else {
        panic!("expected an enqueued id");
    };

    let first = call(&h, RequestCommand::Queue(QueueCommand::Cancel { id })).await;
    assert!(first.is_success());

    let second = h
        .handler
        .handle_request(Request::new(RequestCommand::Queue(QueueCommand::Cancel {
            id,
        })))
        .await;
    assert!(second.is_err());
}

#[tokio::test]
async fn future_enqueue_waits_for_its_time() {
    let h = harness();
    let at = h.clock.now() + chrono::Duration::minutes(10);

    let RequestCommand::Queue(QueueCommand::Enqueue(mut spec)) = enqueue(1) else {
        unreachable!();
    };
    spec.scheduled_at = Some(unix_seconds(at));
    call(&h, RequestCommand::Queue(QueueCommand::Enqueue(spec))).await;

    call(&h, RequestCommand::Queue(QueueCommand::ProcessNow)).await;
    assert_eq!(h.transport.sent_count(), 0);

    h.clock.advance(chrono::Duration::minutes(11));
    call(&h, RequestCommand::Queue(QueueCommand::ProcessNow)).await;
    assert_eq!(h.transport.sent_count(), 1);
}

#[tokio::test]
async fn set_flag_returns_the_new_state() {
    let h = harness();

    let ResponseData::Flags(flags) = data(
        call(
            &h,
            RequestCommand::Queue(QueueCommand::SetFlag {
                flag: FlagName::DemoMode,
                value: true,
            }),
        )
        .await,
    ) else {
        panic!("expected flags");
    };
    assert!(flags.demo_mode);
    assert!(flags.sending_enabled);
    assert!(!flags.paused);
}

#[tokio::test]
async fn campaign_lifecycle() {
    let h = harness();

    let ResponseData::CampaignCreated(id) = data(
        call(
            &h,
            RequestCommand::Campaign(CampaignCommand::Create {
                name: "Spring".to_string(),
                variant_a: CampaignVariant {
                    subject: "Spring letters".to_string(),
                    body: "<p>Hello {{name}}</p>".to_string(),
                },
                variant_b: None,
                priority: None,
            }),
        )
        .await,
    ) else {
        panic!("expected a campaign id");
    };

    let started = call(
        &h,
        RequestCommand::Campaign(CampaignCommand::Start { id, resume: false }),
    )
    .await;
    assert!(started.is_success());

    let ResponseData::Campaigns(campaigns) =
        data(call(&h, RequestCommand::Campaign(CampaignCommand::List)).await)
    else {
        panic!("expected campaigns");
    };
    assert_eq!(campaigns.len(), 1);
    assert_eq!(campaigns[0].id, id);
    assert_eq!(campaigns[0].name, "Spring");
    assert!(!campaigns[0].has_variant_b);

    let ResponseData::Affected(cancelled) = data(
        call(&h, RequestCommand::Campaign(CampaignCommand::Cancel { id })).await,
    ) else {
        panic!("expected a count");
    };
    assert_eq!(cancelled, campaigns[0].queued_count);
}

#[tokio::test]
async fn status_reports_version_and_queue() {
    let h = harness();
    call(&h, enqueue(1)).await;

    let ResponseData::SystemStatus(status) =
        data(call(&h, RequestCommand::System(SystemCommand::Status)).await)
    else {
        panic!("expected status");
    };
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(status.queue_size, 1);
    assert!(!status.tracking_enabled);
}

#[tokio::test]
async fn handler_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missive.sock");
    let socket = socket.to_str().unwrap().to_string();

    let h = harness();
    let server = ControlServer::new(socket.clone(), Arc::new(h.handler));
    let (tx, rx) = broadcast::channel(4);
    let task = tokio::spawn(async move { server.serve(rx).await });

    let client = ControlClient::new(socket.clone());
    let mut attempts = 0;
    while client
        .send(RequestCommand::System(SystemCommand::Ping))
        .await
        .is_err()
    {
        attempts += 1;
        assert!(attempts < 50, "server never came up");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let response = client.send(enqueue(2)).await.unwrap();
    assert!(matches!(
        response.payload,
        ResponsePayload::Data(ref data) if matches!(**data, ResponseData::Enqueued(_))
    ));

    tx.send(Signal::Shutdown).unwrap();
    task.await.unwrap().unwrap();
    assert!(!std::path::Path::new(&socket).exists());
}
