//! In-process stand-in for the server process's gateway, recording every
//! call so tests can assert on the exact traffic.

use ldap_fixture::rpc::protocol::{
    read_frame, write_frame, GatewayRequest, GatewayResponse, RemoteHandle, RpcCall, RpcValue,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};

/// One recorded invocation, with the handle it produced where applicable.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Constructor {
        kind: String,
        args: Vec<RpcValue>,
        handle: RemoteHandle,
    },
    Method {
        target: RemoteHandle,
        name: String,
        args: Vec<RpcValue>,
    },
    NewArray {
        items: Vec<RpcValue>,
        handle: RemoteHandle,
    },
}

#[derive(Default)]
struct State {
    calls: Vec<Recorded>,
    next_object: usize,
    next_server: usize,
    fail_methods: HashSet<String>,
}

/// Fake gateway endpoint. Mints object handles for constructors and
/// arrays, server ids for `create`, configuration handles for `build`,
/// and null acks for everything else.
pub struct FakeDirectoryServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeDirectoryServer {
    pub async fn start() -> Self {
        Self::start_with_failures(&[]).await
    }

    /// Like `start`, but every method named in `fail_methods` replies
    /// with a remote fault instead of a result.
    pub async fn start_with_failures(fail_methods: &[&str]) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            fail_methods: fail_methods.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let state = state.clone();
            let connections = connections.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, state.clone()));
                }
            }
        });

        Self {
            addr,
            state,
            connections,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of forward connections ever accepted.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Compact trace of the recorded traffic: `new <kind>` for
    /// constructors, `array[n]` for arrays, bare method names otherwise.
    pub fn trace(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| match call {
                Recorded::Constructor { kind, .. } => format!("new {}", kind),
                Recorded::Method { name, .. } => name.clone(),
                Recorded::NewArray { items, .. } => format!("array[{}]", items.len()),
            })
            .collect()
    }
}

impl Drop for FakeDirectoryServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let (mut reader, mut writer) = stream.split();
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            _ => return,
        };
        let request: GatewayRequest = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(_) => return,
        };
        let response = respond(request, &state);
        let bytes = serde_json::to_vec(&response).unwrap();
        if write_frame(&mut writer, &bytes).await.is_err() {
            return;
        }
    }
}

fn respond(request: GatewayRequest, state: &Mutex<State>) -> GatewayResponse {
    let mut state = state.lock().unwrap();
    let id = request.id;
    match request.call {
        RpcCall::Constructor { kind, args } => {
            let handle = mint_object(&mut state);
            state.calls.push(Recorded::Constructor {
                kind,
                args,
                handle: handle.clone(),
            });
            GatewayResponse::success(id, RpcValue::Handle(handle))
        }
        RpcCall::Method { target, name, args } => {
            state.calls.push(Recorded::Method {
                target,
                name: name.clone(),
                args,
            });
            if state.fail_methods.contains(&name) {
                return GatewayResponse::failure(id, format!("remote failure in {}", name));
            }
            let result = match name.as_str() {
                "build" => RpcValue::Handle(mint_object(&mut state)),
                "create" => {
                    let handle = RemoteHandle::new(format!("server-{}", state.next_server));
                    state.next_server += 1;
                    RpcValue::Handle(handle)
                }
                _ => RpcValue::Null,
            };
            GatewayResponse::success(id, result)
        }
        RpcCall::NewArray { items } => {
            let handle = mint_object(&mut state);
            state.calls.push(Recorded::NewArray {
                items,
                handle: handle.clone(),
            });
            GatewayResponse::success(id, RpcValue::Handle(handle))
        }
    }
}

fn mint_object(state: &mut State) -> RemoteHandle {
    let handle = RemoteHandle::new(format!("o{}", state.next_object));
    state.next_object += 1;
    handle
}
