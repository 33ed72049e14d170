//! Client for the control socket

use std::{path::Path, sync::Arc, time::Duration};

use tokio::{net::UnixStream, sync::Mutex};
use tracing::{debug, warn};

use crate::{
    ControlError, PROTOCOL_VERSION, Request, RequestCommand, Response, ResponsePayload, Result,
    frame::{MAX_RESPONSE_SIZE, read_frame, write_frame},
};

pub struct ControlClient {
    socket_path: String,
    timeout: Duration,
    token: Option<String>,
    /// Reused across requests when set, reconnecting once on failure
    persistent_connection: Option<Arc<Mutex<Option<UnixStream>>>>,
}

impl ControlClient {
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
            token: None,
            persistent_connection: None,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach `token` to every request sent through [`Self::send`].
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Keep one connection open across requests, for watch loops.
    #[must_use]
    pub fn with_persistent_connection(mut self) -> Self {
        self.persistent_connection = Some(Arc::new(Mutex::new(None)));
        self
    }

    async fn connect(&self) -> Result<UnixStream> {
        debug!("Connecting to control socket: {}", self.socket_path);
        Ok(UnixStream::connect(&self.socket_path).await?)
    }

    /// Wrap `command` in a request carrying the configured token and send it.
    ///
    /// # Errors
    ///
    /// See [`Self::send_request`].
    pub async fn send(&self, command: RequestCommand) -> Result<Response> {
        let request = match &self.token {
            Some(token) => Request::with_token(command, token.clone()),
            None => Request::new(command),
        };
        self.send_request(request).await
    }

    /// Send a request and wait for the response.
    ///
    /// # Errors
    ///
    /// Connection, protocol and timeout failures, and
    /// [`ControlError::ServerError`] when the server answered with an error.
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.dispatch(request))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        let Some(persistent) = &self.persistent_connection else {
            let mut stream = self.connect().await?;
            return Self::exchange(&mut stream, &request).await;
        };

        let mut guard = persistent.lock().await;
        if let Some(stream) = guard.as_mut() {
            match Self::exchange(stream, &request).await {
                Err(ControlError::Io(_) | ControlError::ConnectionClosed) => {
                    warn!(
                        "Persistent connection failed, reconnecting to {}",
                        self.socket_path
                    );
                    *guard = None;
                }
                other => return other,
            }
        }

        let mut stream = self.connect().await?;
        let result = Self::exchange(&mut stream, &request).await;
        if result.is_ok() {
            *guard = Some(stream);
        }
        result
    }

    async fn exchange(stream: &mut UnixStream, request: &Request) -> Result<Response> {
        write_frame(stream, request).await?;
        let response: Response = read_frame(stream, MAX_RESPONSE_SIZE).await?;

        if !response.is_version_compatible() {
            return Err(ControlError::Protocol(format!(
                "Incompatible protocol version: server={}, client={PROTOCOL_VERSION}",
                response.version
            )));
        }

        if let ResponsePayload::Error(err) = &response.payload {
            return Err(ControlError::ServerError(err.clone()));
        }

        Ok(response)
    }

    /// # Errors
    ///
    /// [`ControlError::InvalidSocketPath`] when nothing exists at the path.
    pub fn check_socket_exists(&self) -> Result<()> {
        if Path::new(&self.socket_path).exists() {
            Ok(())
        } else {
            Err(ControlError::InvalidSocketPath(format!(
                "Socket does not exist: {}",
                self.socket_path
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = ControlClient::new("/tmp/test.sock")
            .with_timeout(Duration::from_secs(5))
            .with_token("secret")
            .with_persistent_connection();

        assert_eq!(client.socket_path, "/tmp/test.sock");
        assert_eq!(client.timeout, Duration::from_secs(5));
        assert_eq!(client.token.as_deref(), Some("secret"));
        assert!(client.persistent_connection.is_some());
    }

    #[test]
    fn test_missing_socket_is_reported() {
        let client = ControlClient::new("/nonexistent/missive-test.sock");
        assert!(matches!(
            client.check_socket_exists(),
            Err(ControlError::InvalidSocketPath(_))
        ));
    }
}
