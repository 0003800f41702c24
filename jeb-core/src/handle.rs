//! # Remote Object Handles
//!
//! kRPC classes (vessels, parts, flight telemetry, ...) live on the server. The client only
//! ever sees an opaque 64-bit id, allocated and owned by the server.
//!
//! A [`RemoteObject`] pairs that id with a weak reference to the [`Connection`] that
//! decoded it, so a handle never keeps a socket alive and never outlives its connection in
//! a usable state. There is no release operation: the server decides when ids die.
//!
//! The server forgets a client's objects when it disconnects, so a bound handle is only
//! accepted as an argument by the connection that decoded it, and only while it is open.
//! Detached handles carry a bare id and are accepted anywhere.
use crate::connection::{Connection, Shared};
use crate::transport::TransportError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Weak;

/// A reference to an object owned by the server.
#[derive(Clone)]
pub struct RemoteObject {
    id: u64,
    /// `None` for detached handles.
    connection: Option<Weak<Shared>>,
}

impl RemoteObject {
    pub(crate) fn bound(id: u64, connection: Weak<Shared>) -> Self {
        Self {
            id,
            connection: Some(connection),
        }
    }

    /// A handle that is not associated with any connection.
    ///
    /// Useful when the id comes from outside the engine (user input, a saved session).
    /// It can be passed as an argument on any connection, since only the id goes on the wire.
    pub fn detached(id: u64) -> Self {
        Self {
            id,
            connection: None,
        }
    }

    /// The null object (id 0), which the server uses for "no object".
    pub fn null() -> Self {
        Self::detached(0)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Whether this handle was decoded on a connection, as opposed to built with
    /// [`RemoteObject::detached`].
    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns the connection this handle was decoded on.
    ///
    /// Fails with [`TransportError::Closed`] if the handle is detached, or if its connection
    /// has been closed or dropped.
    pub fn connection(&self) -> Result<Connection, TransportError> {
        let connection = self
            .connection
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Connection::from_shared)
            .ok_or(TransportError::Closed)?;

        if connection.is_closed() {
            return Err(TransportError::Closed);
        }

        Ok(connection)
    }

    /// Whether this handle was decoded on `connection`.
    pub fn belongs_to(&self, connection: &Connection) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|shared| connection.owns(shared))
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && match (&self.connection, &other.connection) {
                (Some(a), Some(b)) => Weak::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
    }
}

impl Eq for RemoteObject {}

impl Hash for RemoteObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("id", &self.id)
            .field("bound", &self.is_bound())
            .finish()
    }
}
