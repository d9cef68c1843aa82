//! Gateway client: resilient connect plus typed remote calls.
//!
//! The server process's startup time is unpredictable, so the first
//! several connect attempts are expected to fail with a refusal. `connect`
//! retries the raw TCP dial for as long as that failure class persists,
//! sleeping a short fixed backoff between attempts; any other failure is
//! fatal immediately.
//!
//! # Thread Safety
//!
//! Calls are serialized over one TCP stream via a tokio `Mutex`. A
//! [`RpcSession`] holds the stream lock for its whole lifetime, so a
//! multi-call sequence cannot be interleaved by another task sharing the
//! client.

use crate::cancel::CancellationToken;
use crate::config::GatewayDefaults;
use crate::error::{FixtureError, Result};
use crate::rpc::protocol::{
    read_frame, write_frame, GatewayRequest, GatewayResponse, RemoteHandle, RpcCall, RpcValue,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Retry behavior for the initial connect.
///
/// The default favors availability over fail-fast: attempts are unbounded
/// and the loop only ends on success, a non-refusal failure, or
/// cancellation. Callers wanting a bounded failure mode set
/// `max_attempts`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Attempt cap; `None` retries indefinitely.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: GatewayDefaults::CONNECT_BACKOFF,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Client side of the gateway channel.
#[derive(Debug)]
pub struct RpcClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Dial the server process's gateway listener, retrying while it is
    /// still starting.
    ///
    /// Only the refusal class is absorbed, and it never surfaces while
    /// retries remain. Cancelling the token aborts the loop with
    /// [`FixtureError::Cancelled`], leaving no half-open connection.
    pub async fn connect(
        addr: SocketAddr,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!("connect to {} cancelled after {} attempts", addr, attempts);
                return Err(FixtureError::Cancelled);
            }

            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    info!("gateway connected to {} (attempt {})", addr, attempts + 1);
                    return Ok(Self {
                        stream: Mutex::new(stream),
                        addr,
                        next_id: AtomicU64::new(1),
                    });
                }
                Err(e) if is_refusal(&e) => {
                    attempts += 1;
                    if let Some(max) = retry.max_attempts {
                        if attempts >= max {
                            return Err(FixtureError::Handshake {
                                message: format!(
                                    "{} still refusing after {} attempts",
                                    addr, attempts
                                ),
                                source: Some(e),
                            });
                        }
                    }
                    debug!(
                        "gateway not ready at {} (attempt {}), retrying in {:?}",
                        addr, attempts, retry.backoff
                    );
                    tokio::time::sleep(retry.backoff).await;
                }
                Err(e) => {
                    return Err(FixtureError::Handshake {
                        message: format!("connect to {} failed", addr),
                        source: Some(e),
                    });
                }
            }
        }
    }

    /// Address of the connected gateway.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Acquire the channel for an uninterrupted call sequence.
    pub async fn session(&self) -> RpcSession<'_> {
        RpcSession {
            stream: self.stream.lock().await,
            next_id: &self.next_id,
        }
    }

    /// Single remote invocation; shorthand for a one-call session.
    pub async fn call(&self, call: RpcCall) -> Result<RpcValue> {
        self.session().await.call(call).await
    }

    /// Close the channel. Any later call fails with a channel error.
    pub async fn shutdown(&self) {
        let mut stream = self.stream.lock().await;
        let _ = stream.shutdown().await;
    }
}

/// The transient failure class absorbed during startup: the child process
/// exists but its listener is not accepting yet.
fn is_refusal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
    )
}

/// Exclusive use of the gateway channel for one logical call sequence.
///
/// Holds the stream lock until dropped; other tasks sharing the client
/// block until then.
pub struct RpcSession<'a> {
    stream: MutexGuard<'a, TcpStream>,
    next_id: &'a AtomicU64,
}

impl RpcSession<'_> {
    /// Issue one call and wait for its reply.
    pub async fn call(&mut self, call: RpcCall) -> Result<RpcValue> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = GatewayRequest { id, call };
        let payload = serde_json::to_vec(&request)?;

        let (mut reader, mut writer) = self.stream.split();

        write_frame(&mut writer, &payload)
            .await
            .map_err(severed)?;

        let reply = read_frame(&mut reader)
            .await
            .map_err(severed)?
            .ok_or(FixtureError::ChannelClosed)?;

        let response: GatewayResponse = serde_json::from_slice(&reply)?;

        if response.id != id {
            return Err(FixtureError::Protocol {
                message: format!("reply id {} does not match request id {}", response.id, id),
            });
        }
        if let Some(fault) = response.error {
            return Err(FixtureError::Remote {
                message: fault.message,
            });
        }
        Ok(response.result.unwrap_or(RpcValue::Null))
    }

    /// Instantiate a remote object and return its handle.
    pub async fn call_constructor(
        &mut self,
        kind: &str,
        args: Vec<RpcValue>,
    ) -> Result<RemoteHandle> {
        let value = self
            .call(RpcCall::Constructor {
                kind: kind.to_string(),
                args,
            })
            .await?;
        expect_handle(value, kind)
    }

    /// Invoke a method on a remote object.
    pub async fn call_method(
        &mut self,
        target: &RemoteHandle,
        name: &str,
        args: Vec<RpcValue>,
    ) -> Result<RpcValue> {
        self.call(RpcCall::Method {
            target: target.clone(),
            name: name.to_string(),
            args,
        })
        .await
    }

    /// Allocate a homogeneous remote array.
    pub async fn new_array(&mut self, items: Vec<RpcValue>) -> Result<RemoteHandle> {
        let value = self.call(RpcCall::NewArray { items }).await?;
        expect_handle(value, "array")
    }
}

/// An IO failure mid-call means the channel is gone.
fn severed(err: FixtureError) -> FixtureError {
    match err {
        FixtureError::Io { .. } => FixtureError::ChannelClosed,
        other => other,
    }
}

fn expect_handle(value: RpcValue, what: &str) -> Result<RemoteHandle> {
    match value {
        RpcValue::Handle(handle) => Ok(handle),
        other => Err(FixtureError::Protocol {
            message: format!("expected a handle for `{}`, got {:?}", what, other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    // A dead port: the loopback connect is refused because nothing has
    // ever listened there in this environment.
    const DEAD_ADDR: &str = "127.0.0.1:1";

    #[tokio::test]
    async fn test_connect_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = RpcClient::connect(addr, &RetryPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.addr(), addr);
    }

    #[tokio::test]
    async fn test_connect_bounded_retry_exhausts() {
        let addr: SocketAddr = DEAD_ADDR.parse().unwrap();
        let retry = RetryPolicy::new()
            .with_backoff(Duration::from_millis(5))
            .with_max_attempts(3);

        let err = RpcClient::connect(addr, &retry, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            FixtureError::Handshake { message, .. } => assert!(message.contains("3 attempts")),
            other => panic!("expected Handshake, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_retries_until_listener_appears() {
        // Reserve a port, release it, and bring the listener up only
        // after the connect loop has already eaten a few refusals.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let _ = listener.accept().await;
        });

        let start = Instant::now();
        let retry = RetryPolicy::new().with_backoff(Duration::from_millis(20));
        let client = RpcClient::connect(addr, &retry, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(client.addr(), addr);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_connect_aborts_on_cancellation() {
        let addr: SocketAddr = DEAD_ADDR.parse().unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let retry = RetryPolicy::new().with_backoff(Duration::from_millis(10));
        let err = RpcClient::connect(addr, &retry, &cancel).await.unwrap_err();

        // Cancellation, not a surfaced refusal.
        assert!(matches!(err, FixtureError::Cancelled));
    }

    #[tokio::test]
    async fn test_connect_pre_cancelled_makes_no_attempt() {
        let addr: SocketAddr = DEAD_ADDR.parse().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = RpcClient::connect(addr, &RetryPolicy::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::Cancelled));
    }

    #[tokio::test]
    async fn test_call_on_closed_channel_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client = RpcClient::connect(addr, &RetryPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();

        // Server side drops the connection immediately.
        let (stream, _) = accept.await.unwrap();
        drop(stream);

        let err = client
            .call(RpcCall::Method {
                target: RemoteHandle::entry_point(),
                name: "start".into(),
                args: vec![],
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FixtureError::ChannelClosed | FixtureError::Io { .. }
        ));
    }
}
