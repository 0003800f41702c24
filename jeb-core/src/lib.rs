//! # Jeb Core
//!
//! `jeb_core` is the library powering the Jeb CLI. It is an asynchronous client for the
//! kRPC remote procedure call protocol, used to drive a running Kerbal Space Program
//! instance over TCP.
//!
//! ## Key Components
//!
//! * **[`Connection`]:** The main entry point. It opens the RPC socket, performs the
//!   handshake and dispatches requests, one request/response cycle at a time.
//! * **[`Call`]:** A procedure invocation. Arguments are encoded when they are added, and
//!   the declared return type drives decoding of the result.
//! * **[`Value`] & [`TypeDescriptor`]:** Runtime values and the kRPC types that shape them
//!   on the wire.
//! * **[`RemoteObject`]:** An opaque handle to a server-side object, tied to the connection
//!   that produced it.
//!
//! ## Lower layers
//!
//! The framing and value codecs are exposed as well, for callers that want to talk to a
//! server without the connection state machine (test servers do exactly that).
//!
//! * **[`FramedTransport`]:** Varint length-prefixed message framing over any async stream.
//! * **[`codec`]:** Pure encoding and decoding of argument and result bytes.
//! * **[`proto`]:** The kRPC protocol messages, generated from `proto/krpc.proto`.
//!
//! ## Feature Flags (Internal use only)
//!
//! * `gen-proto`: Enables the binary that regenerates the protocol bindings.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost` to ensure that consumers use a compatible version when
//! working with [`proto`] messages directly.
pub mod call;
pub mod codec;
pub mod connection;
pub mod handle;
pub mod observer;
pub mod proto;
pub mod transport;
pub mod types;
pub mod value;

pub use call::{Call, CallError};
pub use codec::{DecodeError, EncodeError};
pub use connection::{
    ConnectError, Connection, ConnectionConfig, DEFAULT_ADDRESS, DEFAULT_CLIENT_NAME,
};
pub use handle::RemoteObject;
pub use observer::{MessageKind, MessageObserver, NoopObserver, TracingObserver};
pub use transport::{FramedTransport, TransportError};
pub use types::{ClassType, EnumMember, EnumerationType, TupleShape, TypeDescriptor};
pub use value::{EnumValue, Value};

// Re-exports
pub use prost;
