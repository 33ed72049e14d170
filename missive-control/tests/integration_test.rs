//! Client and server talking over a real Unix socket
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use missive_common::{QueueItemId, Signal};
use missive_control::{
    CommandHandler, ControlAuthConfig, ControlClient, ControlError, ControlServer, QueueCommand,
    Request, RequestCommand, Response, ResponseData, ResponsePayload, Result, SystemCommand,
    auth::hash_token,
    protocol::{QueueHealthReport, SystemStatus},
};
use tempfile::TempDir;
use tokio::sync::broadcast;

#[derive(Default)]
struct MockHandler {
    paused: std::sync::atomic::AtomicBool,
    requests: AtomicUsize,
}

#[async_trait]
impl CommandHandler for MockHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        match request.command {
            RequestCommand::System(SystemCommand::Ping) => Ok(Response::ok()),
            RequestCommand::System(SystemCommand::Status) => {
                Ok(Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: "0.0.1".to_string(),
                    uptime_secs: 42,
                    queue_size: 7,
                    paused: self.paused.load(Ordering::SeqCst),
                    tracking_enabled: true,
                })))
            }
            RequestCommand::Queue(QueueCommand::Pause) => {
                self.paused.store(true, Ordering::SeqCst);
                Ok(Response::ok())
            }
            RequestCommand::Queue(QueueCommand::Health) => {
                Ok(Response::data(ResponseData::QueueHealth(QueueHealthReport {
                    pending: 3,
                    paused: self.paused.load(Ordering::SeqCst),
                    ..QueueHealthReport::default()
                })))
            }
            RequestCommand::Queue(QueueCommand::RetrySelected { ids }) => {
                Ok(Response::data(ResponseData::Affected(ids.len())))
            }
            RequestCommand::Queue(QueueCommand::Cancel { id }) => {
                Err(ControlError::ServerError(format!("queue item {id} not found")))
            }
            _ => Ok(Response::error("not implemented in mock")),
        }
    }
}

struct Running {
    _dir: TempDir,
    socket: String,
    handler: Arc<MockHandler>,
    shutdown: broadcast::Sender<Signal>,
    task: tokio::task::JoinHandle<Result<()>>,
}

async fn start(auth: ControlAuthConfig) -> Running {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("control.sock").to_str().unwrap().to_string();
    let handler = Arc::new(MockHandler::default());

    let server = ControlServer::new(socket.clone(), handler.clone()).with_auth(auth);
    let (shutdown, receiver) = broadcast::channel(1);
    let task = tokio::spawn(async move { server.serve(receiver).await });

    for _ in 0..50 {
        if std::path::Path::new(&socket).exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    Running {
        _dir: dir,
        socket,
        handler,
        shutdown,
        task,
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_ping_and_status() {
    let server = start(ControlAuthConfig::default()).await;
    let client = ControlClient::new(&server.socket);

    let pong = client
        .send(RequestCommand::System(SystemCommand::Ping))
        .await
        .unwrap();
    assert!(matches!(pong.payload, ResponsePayload::Ok));

    let status = client
        .send(RequestCommand::System(SystemCommand::Status))
        .await
        .unwrap();
    match status.payload {
        ResponsePayload::Data(data) => match *data {
            ResponseData::SystemStatus(status) => {
                assert_eq!(status.queue_size, 7);
                assert!(!status.paused);
            }
            other => panic!("Expected SystemStatus, got {other:?}"),
        },
        other => panic!("Expected Data, got {other:?}"),
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_commands_change_server_state() {
    let server = start(ControlAuthConfig::default()).await;
    let client = ControlClient::new(&server.socket);

    client
        .send(RequestCommand::Queue(QueueCommand::Pause))
        .await
        .unwrap();

    let health = client
        .send(RequestCommand::Queue(QueueCommand::Health))
        .await
        .unwrap();
    let ResponsePayload::Data(data) = health.payload else {
        panic!("Expected Data response");
    };
    let ResponseData::QueueHealth(report) = *data else {
        panic!("Expected QueueHealth");
    };
    assert!(report.paused);
    assert_eq!(report.pending, 3);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_handler_errors_surface_as_server_errors() {
    let server = start(ControlAuthConfig::default()).await;
    let client = ControlClient::new(&server.socket);

    let id = QueueItemId::generate();
    let result = client
        .send(RequestCommand::Queue(QueueCommand::Cancel { id }))
        .await;

    match result {
        Err(ControlError::ServerError(message)) => assert!(message.contains(&id.to_string())),
        other => panic!("Expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_auth_rejects_before_handler_runs() {
    let server = start(ControlAuthConfig {
        enabled: true,
        token_hashes: vec![hash_token("operator")],
    })
    .await;

    let anonymous = ControlClient::new(&server.socket)
        .send(RequestCommand::System(SystemCommand::Ping))
        .await;
    assert!(matches!(anonymous, Err(ControlError::ServerError(ref e)) if e.contains("Unauthorised")));

    let wrong = ControlClient::new(&server.socket)
        .with_token("intruder")
        .send(RequestCommand::System(SystemCommand::Ping))
        .await;
    assert!(wrong.is_err());
    assert_eq!(server.handler.requests.load(Ordering::SeqCst), 0);

    ControlClient::new(&server.socket)
        .with_token("operator")
        .send(RequestCommand::System(SystemCommand::Ping))
        .await
        .unwrap();
    assert_eq!(server.handler.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_persistent_connection_serves_many_requests() {
    let server = start(ControlAuthConfig::default()).await;
    let client = ControlClient::new(&server.socket).with_persistent_connection();

    for n in 1..=5 {
        let ids = (0..n).map(|_| QueueItemId::generate()).collect();
        let response = client
            .send(RequestCommand::Queue(QueueCommand::RetrySelected { ids }))
            .await
            .unwrap();
        let ResponsePayload::Data(data) = response.payload else {
            panic!("Expected Data response");
        };
        assert!(matches!(*data, ResponseData::Affected(count) if count == n));
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_second_server_on_live_socket_fails() {
    let server = start(ControlAuthConfig::default()).await;

    let second = ControlServer::new(server.socket.clone(), Arc::new(MockHandler::default()));
    let (_tx, rx) = broadcast::channel(1);
    let result = second.serve(rx).await;

    assert!(matches!(result, Err(ControlError::Io(ref e)) if e.kind() == std::io::ErrorKind::AddrInUse));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_shutdown_removes_socket() {
    let server = start(ControlAuthConfig::default()).await;
    assert!(std::path::Path::new(&server.socket).exists());

    server.shutdown.send(Signal::Shutdown).unwrap();
    server.task.await.unwrap().unwrap();

    assert!(!std::path::Path::new(&server.socket).exists());
    assert!(
        ControlClient::new(&server.socket)
            .check_socket_exists()
            .is_err()
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn test_stale_socket_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("stale.sock");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let socket = socket.to_str().unwrap().to_string();
    let server = ControlServer::new(socket.clone(), Arc::new(MockHandler::default()));
    let (shutdown, receiver) = broadcast::channel(1);
    let task = tokio::spawn(async move { server.serve(receiver).await });

    let client = ControlClient::new(&socket);
    let mut answered = false;
    for _ in 0..50 {
        if client
            .send(RequestCommand::System(SystemCommand::Ping))
            .await
            .is_ok()
        {
            answered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(answered);

    shutdown.send(Signal::Shutdown).unwrap();
    task.await.unwrap().unwrap();
}
