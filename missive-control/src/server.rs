//! Control server

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use missive_common::Signal;
use serde::Deserialize;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    ControlAuthConfig, ControlError, DEFAULT_CONTROL_SOCKET, Request, Response, Result,
    frame::{MAX_REQUEST_SIZE, read_frame, write_frame},
};

/// Idle connections are dropped after this long
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Processes authenticated, version-checked requests.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed. The server turns
    /// it into an error response.
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::socket_path")]
    pub socket_path: String,
    #[serde(default)]
    pub auth: ControlAuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            socket_path: defaults::socket_path(),
            auth: ControlAuthConfig::default(),
        }
    }
}

mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub fn socket_path() -> String {
        super::DEFAULT_CONTROL_SOCKET.to_string()
    }
}

/// Serves the control protocol on a Unix domain socket
pub struct ControlServer {
    socket_path: String,
    handler: Arc<dyn CommandHandler>,
    auth: Arc<ControlAuthConfig>,
}

impl ControlServer {
    #[must_use]
    pub fn new(socket_path: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
            auth: Arc::new(ControlAuthConfig::default()),
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: ControlAuthConfig) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    #[must_use]
    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Accept connections until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if another instance owns the socket or it cannot be
    /// bound.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!(
                        "Socket already in use by running instance: {}",
                        self.socket_path
                    ),
                )));
            }
            info!("Removing stale socket file: {}", self.socket_path);
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(&self.socket_path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms).await?;
        }
        info!(
            auth = self.auth.requires_auth(),
            "Control socket listening on {}", self.socket_path
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let auth = Arc::clone(&self.auth);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler, auth).await {
                                    error!("Error handling control connection: {e}");
                                }
                            });
                        }
                        Err(e) => error!("Error accepting control connection: {e}"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            info!("Control server shutting down");
                        }
                        Err(e) => error!("Control server shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }

        if socket_path.exists() {
            debug!("Removing socket file: {}", self.socket_path);
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    /// Serve requests on one connection until the client hangs up.
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
        auth: Arc<ControlAuthConfig>,
    ) -> Result<()> {
        loop {
            let request: Request = match tokio::time::timeout(
                CONNECTION_TIMEOUT,
                read_frame(&mut stream, MAX_REQUEST_SIZE),
            )
            .await
            {
                Ok(Ok(request)) => request,
                Ok(Err(ControlError::ConnectionClosed)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(ControlError::Timeout),
            };

            trace!("Received request: {:?}", request.command);
            let response = Self::respond(&*handler, &auth, request).await;

            tokio::time::timeout(CONNECTION_TIMEOUT, write_frame(&mut stream, &response))
                .await
                .map_err(|_| ControlError::Timeout)??;
        }
    }

    async fn respond(
        handler: &dyn CommandHandler,
        auth: &ControlAuthConfig,
        request: Request,
    ) -> Response {
        if !request.is_version_compatible() {
            warn!(version = request.version, "Rejecting incompatible request");
            return Response::error(format!(
                "Incompatible protocol version: client={}, server={}",
                request.version,
                crate::PROTOCOL_VERSION
            ));
        }

        if let Err(reason) = auth.authorise(request.token.as_deref()) {
            warn!("Control request rejected: {reason}");
            return Response::error(format!("Unauthorised: {reason}"));
        }

        match handler.handle_request(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error handling request: {e}");
                Response::error(e.to_string())
            }
        }
    }
}
