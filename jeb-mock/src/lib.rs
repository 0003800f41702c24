//! # Mock kRPC Server
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a scriptable kRPC RPC server
//! for integration testing `jeb_core` and the `jeb` CLI.
//! It is not intended for production use.
//!
//! The server speaks the real wire protocol (varint framing, `ConnectionRequest` handshake,
//! `Request`/`Response` cycles) on a loopback port. Procedures are answered by closures
//! registered on the builder; everything the clients send is recorded for assertions.
use jeb_core::FramedTransport;
use jeb_core::proto::{self, connection_response};
use prost::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Client identifier handed out by default.
pub const CLIENT_ID: &[u8] = b"jeb-mock-client!";

/// The outcome of a single procedure.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Encoded result bytes.
    Value(Vec<u8>),
    /// A per-call error with the given description.
    Error(String),
}

type Handler = Arc<dyn Fn(&proto::ProcedureCall) -> Reply + Send + Sync>;

#[derive(Debug, Clone)]
enum Handshake {
    Accept(Vec<u8>),
    Reject {
        status: connection_response::Status,
        message: String,
    },
}

/// Configures and starts a [`MockServer`].
pub struct MockServerBuilder {
    handshake: Handshake,
    handlers: HashMap<(String, String), Handler>,
    request_error: Option<String>,
    response_delay: Option<Duration>,
    chunk_size: Option<usize>,
    drop_results: bool,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            handshake: Handshake::Accept(CLIENT_ID.to_vec()),
            handlers: HashMap::new(),
            request_error: None,
            response_delay: None,
            chunk_size: None,
            drop_results: false,
        }
    }
}

impl MockServerBuilder {
    /// Accepts every client and assigns it `id`.
    pub fn accept(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.handshake = Handshake::Accept(id.into());
        self
    }

    /// Refuses every client with `status`.
    pub fn reject(mut self, status: connection_response::Status, message: impl Into<String>) -> Self {
        self.handshake = Handshake::Reject {
            status,
            message: message.into(),
        };
        self
    }

    /// Answers `service.procedure` with `handler`. Unregistered procedures fail per call.
    pub fn procedure<F>(mut self, service: &str, procedure: &str, handler: F) -> Self
    where
        F: Fn(&proto::ProcedureCall) -> Reply + Send + Sync + 'static,
    {
        self.handlers
            .insert((service.to_string(), procedure.to_string()), Arc::new(handler));
        self
    }

    /// Answers `service.procedure` with the same bytes every time.
    pub fn returns(self, service: &str, procedure: &str, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        self.procedure(service, procedure, move |_| Reply::Value(value.clone()))
    }

    /// Fails every request as a whole with `description`.
    pub fn fails_requests(mut self, description: impl Into<String>) -> Self {
        self.request_error = Some(description.into());
        self
    }

    /// Answers every request without any results.
    pub fn drops_results(mut self) -> Self {
        self.drop_results = true;
        self
    }

    /// Waits `delay` before writing each response.
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    /// Writes responses `size` bytes at a time, flushing between pieces.
    pub fn chunked_writes(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Binds a loopback port and starts accepting clients.
    pub async fn start(self) -> std::io::Result<MockServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State {
            config: self,
            connection_requests: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        });

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, peer)) = listener.accept().await {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve(stream, &state).await {
                            tracing::debug!(%peer, error = %err, "mock client session ended");
                        }
                    });
                }
            }
        });

        Ok(MockServer { addr, state, task })
    }
}

/// A running mock server. It stops accepting clients when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// `host:port` the server listens on.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Every handshake request received so far.
    pub fn connection_requests(&self) -> Vec<proto::ConnectionRequest> {
        lock(&self.state.connection_requests).clone()
    }

    /// Every procedure call received so far, across all requests, in arrival order.
    pub fn calls(&self) -> Vec<proto::ProcedureCall> {
        lock(&self.state.calls).clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct State {
    config: MockServerBuilder,
    connection_requests: Mutex<Vec<proto::ConnectionRequest>>,
    calls: Mutex<Vec<proto::ProcedureCall>>,
}

impl State {
    fn handshake(&self, request: proto::ConnectionRequest) -> proto::ConnectionResponse {
        lock(&self.connection_requests).push(request);

        match &self.config.handshake {
            Handshake::Accept(id) => proto::ConnectionResponse {
                status: connection_response::Status::Ok as i32,
                message: String::new(),
                client_identifier: id.clone(),
            },
            Handshake::Reject { status, message } => proto::ConnectionResponse {
                status: *status as i32,
                message: message.clone(),
                client_identifier: Vec::new(),
            },
        }
    }

    fn respond(&self, request: proto::Request) -> proto::Response {
        lock(&self.calls).extend(request.calls.iter().cloned());

        if let Some(description) = &self.config.request_error {
            return proto::Response {
                error: Some(error("KRPC", "RPCException", description)),
                results: Vec::new(),
            };
        }

        if self.config.drop_results {
            return proto::Response::default();
        }

        let results = request
            .calls
            .iter()
            .map(|call| {
                let key = (call.service.clone(), call.procedure.clone());
                let reply = match self.config.handlers.get(&key) {
                    Some(handler) => handler(call),
                    None => Reply::Error(format!(
                        "Procedure not found: {}.{}",
                        call.service, call.procedure
                    )),
                };

                match reply {
                    Reply::Value(value) => proto::ProcedureResult { error: None, value },
                    Reply::Error(description) => proto::ProcedureResult {
                        error: Some(error(&call.service, "RPCException", &description)),
                        value: Vec::new(),
                    },
                }
            })
            .collect();

        proto::Response {
            error: None,
            results,
        }
    }
}

/// Runs one client session: the handshake, then request/response cycles until EOF.
async fn serve<S>(stream: S, state: &State) -> Result<(), jeb_core::TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = FramedTransport::new(stream);

    let payload = transport.read_message().await?;
    let response = state.handshake(proto::ConnectionRequest::decode(payload)?);
    let accepted = response.status == connection_response::Status::Ok as i32;
    write(&mut transport, &response, state).await?;

    if !accepted {
        return transport.shutdown().await;
    }

    loop {
        let payload = match transport.read_message().await {
            Ok(payload) => payload,
            Err(jeb_core::TransportError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        };

        let response = state.respond(proto::Request::decode(payload)?);

        if let Some(delay) = state.config.response_delay {
            tokio::time::sleep(delay).await;
        }

        write(&mut transport, &response, state).await?;
    }
}

async fn write<S, M>(
    transport: &mut FramedTransport<S>,
    message: &M,
    state: &State,
) -> Result<(), jeb_core::TransportError>
where
    S: AsyncWrite + Unpin,
    M: Message,
{
    let Some(chunk_size) = state.config.chunk_size else {
        return transport.write_message(&message.encode_to_vec()).await;
    };

    let frame = message.encode_length_delimited_to_vec();
    let stream = transport.get_mut();
    for chunk in frame.chunks(chunk_size) {
        stream.write_all(chunk).await?;
        stream.flush().await?;
        tokio::task::yield_now().await;
    }

    Ok(())
}

fn error(service: &str, name: &str, description: &str) -> proto::Error {
    proto::Error {
        service: service.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        stack_trace: String::new(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
