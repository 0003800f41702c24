//! # Call Dispatcher
//!
//! Turns procedure invocations into kRPC `Request` messages and matches the `Response`
//! back to them.
//!
//! A single request can carry any number of calls. The server executes them in order and
//! answers with one result per call, so results are matched by position. Failures come in
//! two layers:
//!
//! * A top-level `Response.error` means the whole request failed; no call results exist.
//! * A per-result `error` only fails that call. Its siblings still carry their results.
use crate::codec::{self, DecodeError, EncodeError};
use crate::connection::Connection;
use crate::handle::RemoteObject;
use crate::proto;
use crate::transport::TransportError;
use crate::types::TypeDescriptor;
use crate::value::Value;
use prost::Message;
use std::time::Duration;

/// Errors returned by procedure calls.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to encode argument: '{0}'")]
    Encode(#[from] EncodeError),
    #[error("Failed to decode result: '{0}'")]
    Decode(#[from] DecodeError),
    #[error("Request failed: '{0}'")]
    Service(String),
    #[error("Procedure failed: '{0}'")]
    Remote(String),
    #[error("Server returned {received} results for {expected} calls")]
    ResultCountMismatch { expected: usize, received: usize },
    #[error("Object {0} was decoded on a different connection")]
    ForeignObject(u64),
}

/// A single procedure invocation.
///
/// Arguments get consecutive positions in the order they are added:
///
/// ```
/// use jeb_core::{Call, TypeDescriptor, Value};
///
/// let call = Call::new("SpaceCenter", "Flight_get_MeanAltitude")
///     .arg(&TypeDescriptor::class("SpaceCenter", "Flight"), &Value::Object(jeb_core::RemoteObject::detached(7)))
///     .unwrap()
///     .returns(TypeDescriptor::Float64);
///
/// assert_eq!(call.arguments()[0].value, vec![0x07]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    service: String,
    procedure: String,
    arguments: Vec<proto::Argument>,
    returns: Option<TypeDescriptor>,
    /// Bound handles among the arguments, checked against the connection at dispatch.
    handles: Vec<RemoteObject>,
}

impl Call {
    pub fn new(service: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            procedure: procedure.into(),
            arguments: Vec::new(),
            returns: None,
            handles: Vec::new(),
        }
    }

    /// Encodes `value` as `ty` and appends it as the next argument.
    ///
    /// Handles decoded on a connection may only be sent back over that same connection;
    /// this is checked when the call is dispatched.
    pub fn arg(mut self, ty: &TypeDescriptor, value: &Value) -> Result<Self, EncodeError> {
        let bytes = codec::encode(ty, value)?;
        collect_bound_handles(value, &mut self.handles);
        Ok(self.raw_arg(bytes))
    }

    /// Appends already encoded argument bytes.
    pub fn raw_arg(mut self, value: Vec<u8>) -> Self {
        let position = self.arguments.len() as u32;
        self.arguments.push(proto::Argument { position, value });
        self
    }

    /// Declares the result type. Calls without one decode to `None`.
    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.returns = Some(ty);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn arguments(&self) -> &[proto::Argument] {
        &self.arguments
    }

    pub fn return_type(&self) -> Option<&TypeDescriptor> {
        self.returns.as_ref()
    }

    /// Fails if a bound handle argument is stale or was decoded on another connection.
    fn check_handles(&self, connection: &Connection) -> Result<(), CallError> {
        for handle in &self.handles {
            handle.connection()?;
            if !handle.belongs_to(connection) {
                return Err(CallError::ForeignObject(handle.id()));
            }
        }
        Ok(())
    }

    fn to_proto(&self) -> proto::ProcedureCall {
        proto::ProcedureCall {
            service: self.service.clone(),
            procedure: self.procedure.clone(),
            service_id: 0,
            procedure_id: 0,
            arguments: self.arguments.clone(),
        }
    }
}

type RawResult = Result<Vec<u8>, CallError>;
type DecodedResult = Result<Option<Value>, CallError>;

impl Connection {
    /// Invokes a single procedure and returns its raw result bytes.
    pub async fn call_raw(&self, call: &Call) -> RawResult {
        let mut results = self.batch_raw(std::slice::from_ref(call)).await?;
        results.pop().unwrap_or(Err(CallError::ResultCountMismatch {
            expected: 1,
            received: 0,
        }))
    }

    /// Invokes a single procedure and decodes its result with the declared return type.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Value))` - The procedure returned a value.
    /// * `Ok(None)` - The call declares no return type.
    /// * `Err(CallError)` - The request or the procedure failed.
    pub async fn call(&self, call: &Call) -> DecodedResult {
        let mut results = self.batch(std::slice::from_ref(call)).await?;
        results.pop().unwrap_or(Err(CallError::ResultCountMismatch {
            expected: 1,
            received: 0,
        }))
    }

    pub async fn call_with_timeout(&self, call: &Call, timeout: Duration) -> DecodedResult {
        let mut results = self
            .batch_with_timeout(std::slice::from_ref(call), timeout)
            .await?;
        results.pop().unwrap_or(Err(CallError::ResultCountMismatch {
            expected: 1,
            received: 0,
        }))
    }

    /// Sends every call in one request and returns one raw result per call, in order.
    ///
    /// The outer `Err` covers failures of the request as a whole. The inner results fail
    /// independently.
    pub async fn batch_raw(&self, calls: &[Call]) -> Result<Vec<RawResult>, CallError> {
        self.dispatch(calls, self.config().call_timeout).await
    }

    pub async fn batch(&self, calls: &[Call]) -> Result<Vec<DecodedResult>, CallError> {
        let raw = self.dispatch(calls, self.config().call_timeout).await?;
        Ok(self.decode_results(calls, raw))
    }

    /// Like [`Connection::batch`], overriding the configured call timeout.
    ///
    /// Hitting the deadline closes the connection.
    pub async fn batch_with_timeout(
        &self,
        calls: &[Call],
        timeout: Duration,
    ) -> Result<Vec<DecodedResult>, CallError> {
        let raw = self.dispatch(calls, Some(timeout)).await?;
        Ok(self.decode_results(calls, raw))
    }

    /// Fetches the server's `KRPC.GetStatus` report.
    pub async fn status(&self) -> Result<proto::Status, CallError> {
        let bytes = self.call_raw(&Call::new("KRPC", "GetStatus")).await?;
        Ok(proto::Status::decode(bytes.as_slice()).map_err(DecodeError::from)?)
    }

    async fn dispatch(
        &self,
        calls: &[Call],
        deadline: Option<Duration>,
    ) -> Result<Vec<RawResult>, CallError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        for call in calls {
            call.check_handles(self)?;
        }

        let request = proto::Request {
            calls: calls.iter().map(Call::to_proto).collect(),
        };

        tracing::trace!(calls = calls.len(), "dispatching request");
        let response = self.exchange(&request, deadline).await?;

        if let Some(error) = response.error {
            return Err(CallError::Service(describe(&error)));
        }

        if response.results.len() != calls.len() {
            return Err(CallError::ResultCountMismatch {
                expected: calls.len(),
                received: response.results.len(),
            });
        }

        Ok(response
            .results
            .into_iter()
            .map(|result| match result.error {
                Some(error) => Err(CallError::Remote(describe(&error))),
                None => Ok(result.value),
            })
            .collect())
    }

    fn decode_results(&self, calls: &[Call], raw: Vec<RawResult>) -> Vec<DecodedResult> {
        calls
            .iter()
            .zip(raw)
            .map(|(call, result)| -> DecodedResult {
                let bytes = result?;
                match &call.returns {
                    Some(ty) => Ok(Some(self.decode(ty, &bytes)?)),
                    None => Ok(None),
                }
            })
            .collect()
    }
}

// The null object means "no object" on every connection.
fn collect_bound_handles(value: &Value, out: &mut Vec<RemoteObject>) {
    match value {
        Value::Object(handle) if handle.is_bound() && !handle.is_null() => {
            out.push(handle.clone())
        }
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                collect_bound_handles(item, out);
            }
        }
        _ => {}
    }
}

fn describe(error: &proto::Error) -> String {
    match (error.description.is_empty(), error.name.is_empty()) {
        (false, _) => error.description.clone(),
        (true, false) => format!("{}.{}", error.service, error.name),
        (true, true) => "unknown error".to_string(),
    }
}
