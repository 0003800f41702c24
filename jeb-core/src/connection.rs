//! # Connection
//!
//! A [`Connection`] owns one RPC socket to a kRPC server.
//!
//! ## Handshake
//!
//! Right after the socket opens the client sends a `ConnectionRequest` (type `RPC`, its
//! client name and an empty identifier) and waits for a single `ConnectionResponse`. Any
//! status other than `OK` aborts the connection with [`ConnectError::Rejected`]; on success
//! the server-assigned client identifier is stored and exposed through [`Connection::id`].
//!
//! ## Request/response cycle
//!
//! kRPC answers requests strictly in submission order and carries no correlation ids, so a
//! connection allows exactly one request in flight. Clones of a `Connection` share the
//! socket; an async mutex serialises whole cycles (request written, response fully read).
//!
//! Any transport failure closes the connection: once a read or write fails, nobody knows
//! where the next message boundary is. The same applies to a call future that is dropped
//! after sending its request but before reading the response; the next call notices and
//! fails with [`TransportError::Desynchronized`].
use crate::codec::{self, DecodeError};
use crate::observer::{MessageKind, MessageObserver, TracingObserver};
use crate::proto::{self, connection_request, connection_response};
use crate::transport::{DEFAULT_MAX_MESSAGE_SIZE, FramedTransport, TransportError};
use crate::types::TypeDescriptor;
use crate::value::Value;
use prost::Message;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Client name announced during the handshake unless configured otherwise.
pub const DEFAULT_CLIENT_NAME: &str = "jeb";

/// Address of the RPC server started by a default kRPC installation.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:50000";

/// Any async byte stream a connection can run over.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> IoStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedTransport = FramedTransport<Box<dyn IoStream>>;

/// Errors that can occur while opening a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Failed to connect to '{0}': '{1}'")]
    ConnectionFailed(String, #[source] std::io::Error),
    #[error("Handshake failed: '{0}'")]
    Transport(#[from] TransportError),
    #[error("Server rejected the connection: '{0}'")]
    Rejected(String),
}

/// Point in time by which a connection must be established, with the limit it came from.
type ConnectDeadline = Option<(Instant, Duration)>;

/// Settings applied to a connection for its whole lifetime.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Name shown for this client in the server's UI.
    pub client_name: String,
    /// Largest response payload accepted from the server.
    pub max_message_size: usize,
    /// Deadline for opening the socket and completing the handshake, shared by both steps.
    pub connect_timeout: Option<Duration>,
    /// Default deadline for a request/response cycle.
    pub call_timeout: Option<Duration>,
    pub observer: Arc<dyn MessageObserver>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            connect_timeout: None,
            call_timeout: None,
            observer: Arc::new(TracingObserver),
        }
    }
}

impl ConnectionConfig {
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_observer(mut self, observer: impl MessageObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("client_name", &self.client_name)
            .field("max_message_size", &self.max_message_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// A live RPC connection to a kRPC server.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    id: Vec<u8>,
    config: ConnectionConfig,
    closed: AtomicBool,
    channel: Mutex<Channel>,
}

struct Channel {
    transport: Option<BoxedTransport>,
    /// Set while a request has been written but its response not yet read.
    in_flight: bool,
}

impl Connection {
    /// Connects to `addr` with the default configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(Connection)` - The handshake succeeded.
    /// * `Err(ConnectError)` - The socket could not be opened, the handshake failed, or the
    ///   server refused the client.
    pub async fn connect(addr: &str) -> Result<Self, ConnectError> {
        Self::connect_with(addr, ConnectionConfig::default()).await
    }

    pub async fn connect_with(addr: &str, config: ConnectionConfig) -> Result<Self, ConnectError> {
        let deadline = connect_deadline(&config);

        let connecting = TcpStream::connect(addr);
        let stream = match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, connecting)
                .await
                .map_err(|_| TransportError::TimedOut(limit))?,
            None => connecting.await,
        }
        .map_err(|e| ConnectError::ConnectionFailed(addr.to_string(), e))?;

        stream
            .set_nodelay(true)
            .map_err(|e| ConnectError::ConnectionFailed(addr.to_string(), e))?;

        tracing::info!(addr, "connected, starting handshake");
        Self::handshake_until(stream, config, deadline).await
    }

    /// Performs the RPC handshake over an already open stream.
    ///
    /// The configured connect timeout starts counting when this is called.
    pub async fn handshake<S: IoStream>(
        stream: S,
        config: ConnectionConfig,
    ) -> Result<Self, ConnectError> {
        let deadline = connect_deadline(&config);
        Self::handshake_until(stream, config, deadline).await
    }

    async fn handshake_until<S: IoStream>(
        stream: S,
        config: ConnectionConfig,
        deadline: ConnectDeadline,
    ) -> Result<Self, ConnectError> {
        let stream: Box<dyn IoStream> = Box::new(stream);
        let mut transport =
            FramedTransport::new(stream).with_max_message_size(config.max_message_size);

        let request = proto::ConnectionRequest {
            r#type: connection_request::Type::Rpc as i32,
            client_name: config.client_name.clone(),
            client_identifier: Vec::new(),
        };

        let observer = config.observer.as_ref();
        let exchange = async {
            send(&mut transport, observer, MessageKind::ConnectionRequest, &request).await?;
            receive::<proto::ConnectionResponse>(
                &mut transport,
                observer,
                MessageKind::ConnectionResponse,
            )
            .await
        };
        let response = match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, exchange)
                .await
                .map_err(|_| TransportError::TimedOut(limit))??,
            None => exchange.await?,
        };

        let status = connection_response::Status::try_from(response.status);
        if !matches!(status, Ok(connection_response::Status::Ok)) {
            let status = status.map_or("UNKNOWN", |s| s.as_str_name());
            tracing::warn!(status, message = %response.message, "server rejected the connection");

            // The socket goes away with the transport either way.
            let _ = transport.shutdown().await;

            let message = if response.message.is_empty() {
                status.to_string()
            } else {
                response.message
            };
            return Err(ConnectError::Rejected(message));
        }

        tracing::info!(client_name = %config.client_name, "handshake complete");

        Ok(Self {
            shared: Arc::new(Shared {
                id: response.client_identifier,
                config,
                closed: AtomicBool::new(false),
                channel: Mutex::new(Channel {
                    transport: Some(transport),
                    in_flight: false,
                }),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn owns(&self, shared: &Weak<Shared>) -> bool {
        std::ptr::eq(shared.as_ptr(), Arc::as_ptr(&self.shared))
    }

    /// The client identifier assigned by the server during the handshake.
    pub fn id(&self) -> &[u8] {
        &self.shared.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Shuts the socket down. Every clone of this connection, and every handle decoded on
    /// it, stops working. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut channel = self.shared.channel.lock().await;
        self.shared.closed.store(true, Ordering::Release);

        if let Some(mut transport) = channel.transport.take() {
            tracing::info!("closing connection");
            transport.shutdown().await?;
        }

        Ok(())
    }

    /// Decodes `bytes` as `ty`, binding any handle to this connection.
    pub fn decode(&self, ty: &TypeDescriptor, bytes: &[u8]) -> Result<Value, DecodeError> {
        codec::decode_bound(ty, bytes, Some(&Arc::downgrade(&self.shared)))
    }

    /// Sends one `Request` and reads the matching `Response`.
    pub(crate) async fn exchange(
        &self,
        request: &proto::Request,
        deadline: Option<Duration>,
    ) -> Result<proto::Response, TransportError> {
        let mut guard = self.shared.channel.lock().await;
        let channel = &mut *guard;

        if channel.in_flight {
            let err = TransportError::Desynchronized;
            self.fail(channel, &err);
            return Err(err);
        }

        let Some(transport) = channel.transport.as_mut() else {
            return Err(TransportError::Closed);
        };

        channel.in_flight = true;

        let observer = self.shared.config.observer.as_ref();
        let cycle = async {
            send(transport, observer, MessageKind::Request, request).await?;
            receive::<proto::Response>(transport, observer, MessageKind::Response).await
        };

        match with_deadline(deadline, cycle).await {
            Ok(response) => {
                channel.in_flight = false;
                Ok(response)
            }
            Err(err) => {
                self.fail(channel, &err);
                Err(err)
            }
        }
    }

    fn fail(&self, channel: &mut Channel, err: &TransportError) {
        tracing::warn!(error = %err, "closing connection after transport failure");
        channel.transport = None;
        channel.in_flight = false;
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn send<M: Message>(
    transport: &mut BoxedTransport,
    observer: &dyn MessageObserver,
    kind: MessageKind,
    message: &M,
) -> Result<(), TransportError> {
    let payload = message.encode_to_vec();
    transport.write_message(&payload).await?;
    observer.message_sent(kind, payload.len());
    Ok(())
}

async fn receive<M: Message + Default>(
    transport: &mut BoxedTransport,
    observer: &dyn MessageObserver,
    kind: MessageKind,
) -> Result<M, TransportError> {
    let payload = transport.read_message().await?;
    observer.message_received(kind, payload.len());
    Ok(M::decode(payload)?)
}

fn connect_deadline(config: &ConnectionConfig) -> ConnectDeadline {
    config
        .connect_timeout
        .map(|limit| (Instant::now() + limit, limit))
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    future: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportError::TimedOut(limit))?,
        None => future.await,
    }
}
