//! Gateway wrapper: forward channel, controller entry point, and the
//! reverse listener the server process uses for callbacks.
//!
//! The forward direction carries every call this crate issues. The
//! reverse listener exists so the server process can push notifications
//! or register callbacks into the parent; the configuration and lifecycle
//! flow never depends on it, but the port must be open for the channel
//! contract to hold.

use crate::cancel::CancellationToken;
use crate::error::{FixtureError, Result};
use crate::rpc::client::{RetryPolicy, RpcClient, RpcSession};
use crate::rpc::protocol::{
    read_frame, write_frame, GatewayRequest, GatewayResponse, RemoteHandle, RpcValue,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Handler for calls the server process pushes back to the parent.
#[async_trait::async_trait]
pub trait CallbackHandler: Send + Sync + 'static {
    async fn handle(&self, request: GatewayRequest) -> Result<RpcValue>;
}

/// Default handler: log the callback and acknowledge it.
pub struct LoggingCallbackHandler;

#[async_trait::async_trait]
impl CallbackHandler for LoggingCallbackHandler {
    async fn handle(&self, request: GatewayRequest) -> Result<RpcValue> {
        debug!("callback from server process: {:?}", request.call);
        Ok(RpcValue::Null)
    }
}

/// Bidirectional gateway to the server process.
#[derive(Debug)]
pub struct RpcGateway {
    client: RpcClient,
    entry_point: RemoteHandle,
    callback_addr: SocketAddr,
    callback_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcGateway {
    /// Connect the forward channel and bind the reverse listener.
    ///
    /// Blocks (retrying) until the server process accepts the forward
    /// connection; see [`RpcClient::connect`] for the retry semantics.
    /// A `callback_port` of 0 lets the OS assign one.
    pub async fn open(
        gateway_port: u16,
        callback_port: u16,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
        handler: Arc<dyn CallbackHandler>,
    ) -> Result<Self> {
        let gateway_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, gateway_port));
        let client = RpcClient::connect(gateway_addr, retry, cancel).await?;

        let callback_bind = SocketAddr::from((Ipv4Addr::LOCALHOST, callback_port));
        let listener = TcpListener::bind(callback_bind)
            .await
            .map_err(|e| FixtureError::Handshake {
                message: format!("failed to bind callback listener on {}", callback_bind),
                source: Some(e),
            })?;
        let callback_addr = listener.local_addr()?;
        info!("callback listener bound on {}", callback_addr);

        let callback_task = tokio::spawn(Self::callback_loop(listener, handler));

        Ok(Self {
            client,
            entry_point: RemoteHandle::entry_point(),
            callback_addr,
            callback_task: Mutex::new(Some(callback_task)),
        })
    }

    /// Handle of the server controller object.
    pub fn entry_point(&self) -> &RemoteHandle {
        &self.entry_point
    }

    /// Address the server process can dial for callbacks.
    pub fn callback_addr(&self) -> SocketAddr {
        self.callback_addr
    }

    /// Acquire the forward channel for an uninterrupted call sequence.
    pub async fn session(&self) -> RpcSession<'_> {
        self.client.session().await
    }

    /// Close both directions. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(task) = self.callback_task.lock().unwrap().take() {
            task.abort();
        }
        self.client.shutdown().await;
        debug!("gateway shut down");
    }

    async fn callback_loop(listener: TcpListener, handler: Arc<dyn CallbackHandler>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("callback connection from {}", peer);
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::serve_callbacks(stream, &*handler).await {
                            debug!("callback connection {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("callback accept failed: {}", e);
                }
            }
        }
    }

    async fn serve_callbacks(mut stream: TcpStream, handler: &dyn CallbackHandler) -> Result<()> {
        let (mut reader, mut writer) = stream.split();
        loop {
            let Some(frame) = read_frame(&mut reader).await? else {
                return Ok(());
            };
            let request: GatewayRequest = serde_json::from_slice(&frame)?;
            let id = request.id;
            let response = match handler.handle(request).await {
                Ok(value) => GatewayResponse::success(id, value),
                Err(e) => GatewayResponse::failure(id, e.to_string()),
            };
            write_frame(&mut writer, &serde_json::to_vec(&response)?).await?;
        }
    }
}

impl Drop for RpcGateway {
    fn drop(&mut self) {
        if let Ok(mut task) = self.callback_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::RpcCall;
    use tokio::sync::Mutex as AsyncMutex;

    /// Stands in for the server process's side of the forward channel:
    /// accepts the connection and holds it open.
    async fn forward_stub() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    struct RecordingHandler {
        seen: AsyncMutex<Vec<GatewayRequest>>,
    }

    #[async_trait::async_trait]
    impl CallbackHandler for RecordingHandler {
        async fn handle(&self, request: GatewayRequest) -> Result<RpcValue> {
            self.seen.lock().await.push(request);
            Ok(RpcValue::Bool(true))
        }
    }

    #[tokio::test]
    async fn test_open_and_shutdown_idempotent() {
        let (listener, port) = forward_stub().await;
        let hold = tokio::spawn(async move { listener.accept().await.unwrap() });

        let gateway = RpcGateway::open(
            port,
            0,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            Arc::new(LoggingCallbackHandler),
        )
        .await
        .unwrap();

        assert_eq!(
            gateway.entry_point().id(),
            RemoteHandle::ENTRY_POINT_ID
        );

        gateway.shutdown().await;
        gateway.shutdown().await;
        hold.abort();
    }

    #[tokio::test]
    async fn test_callbacks_reach_the_handler() {
        let (listener, port) = forward_stub().await;
        let hold = tokio::spawn(async move { listener.accept().await.unwrap() });

        let handler = Arc::new(RecordingHandler {
            seen: AsyncMutex::new(Vec::new()),
        });
        let gateway = RpcGateway::open(
            port,
            0,
            &RetryPolicy::default(),
            &CancellationToken::new(),
            handler.clone(),
        )
        .await
        .unwrap();

        // Pose as the server process: dial the callback port and push one
        // notification.
        let mut stream = TcpStream::connect(gateway.callback_addr()).await.unwrap();
        let request = GatewayRequest {
            id: 42,
            call: RpcCall::Method {
                target: RemoteHandle::entry_point(),
                name: "notify".into(),
                args: vec![RpcValue::Str("started".into())],
            },
        };
        let (mut reader, mut writer) = stream.split();
        write_frame(&mut writer, &serde_json::to_vec(&request).unwrap())
            .await
            .unwrap();

        let reply = read_frame(&mut reader).await.unwrap().unwrap();
        let response: GatewayResponse = serde_json::from_slice(&reply).unwrap();
        assert_eq!(response.id, 42);
        assert_eq!(response.result, Some(RpcValue::Bool(true)));

        assert_eq!(handler.seen.lock().await.len(), 1);

        gateway.shutdown().await;
        hold.abort();
    }
}
