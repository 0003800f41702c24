use jeb_core::proto::connection_response::Status;
use jeb_core::{
    Call, CallError, ConnectError, Connection, ConnectionConfig, MessageKind, MessageObserver,
    TransportError, TypeDescriptor,
};
use jeb_mock::{CLIENT_ID, MockServer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn active_vessel() -> Call {
    Call::new("SpaceCenter", "get_ActiveVessel")
        .returns(TypeDescriptor::class("SpaceCenter", "Vessel"))
}

#[tokio::test]
async fn test_handshake_assigns_client_id() {
    let server = MockServer::builder().start().await.unwrap();

    let config = ConnectionConfig::default().with_client_name("Mission Control");
    let connection = Connection::connect_with(&server.addr(), config).await.unwrap();

    assert_eq!(connection.id(), CLIENT_ID);
    assert!(!connection.is_closed());

    let requests = server.connection_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].client_name, "Mission Control");
    assert_eq!(requests[0].r#type, 0);
    assert!(requests[0].client_identifier.is_empty());
}

#[tokio::test]
async fn test_default_client_name_is_announced() {
    let server = MockServer::builder().start().await.unwrap();

    Connection::connect(&server.addr()).await.unwrap();

    assert_eq!(server.connection_requests()[0].client_name, "jeb");
}

#[tokio::test]
async fn test_rejected_handshake() {
    let server = MockServer::builder()
        .reject(Status::WrongType, "Wrong connection type")
        .start()
        .await
        .unwrap();

    let err = Connection::connect(&server.addr()).await.unwrap_err();

    match err {
        ConnectError::Rejected(message) => assert_eq!(message, "Wrong connection type"),
        other => panic!("Expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_without_message_reports_status() {
    let server = MockServer::builder()
        .reject(Status::Timeout, "")
        .start()
        .await
        .unwrap();

    let err = Connection::connect(&server.addr()).await.unwrap_err();

    assert!(matches!(err, ConnectError::Rejected(message) if message == "TIMEOUT"));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = Connection::connect(&addr).await.unwrap_err();

    assert!(matches!(err, ConnectError::ConnectionFailed(ref a, _) if *a == addr));
}

#[tokio::test]
async fn test_responses_arriving_byte_by_byte() {
    let server = MockServer::builder()
        .chunked_writes(1)
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();
    let vessel = connection.call(&active_vessel()).await.unwrap().unwrap();

    assert_eq!(vessel.as_object().map(|h| h.id()), Some(7));
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let server = MockServer::builder()
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();
    let vessel = connection
        .call(&active_vessel())
        .await
        .unwrap()
        .and_then(|v| v.into_object())
        .unwrap();

    assert!(vessel.belongs_to(&connection));
    assert!(vessel.connection().is_ok());

    connection.close().await.unwrap();
    connection.close().await.unwrap();

    assert!(connection.is_closed());
    assert!(matches!(
        connection.call(&active_vessel()).await,
        Err(CallError::Transport(TransportError::Closed))
    ));
    assert!(matches!(vessel.connection(), Err(TransportError::Closed)));
}

fn vessel_flight(vessel: jeb_core::RemoteObject) -> Call {
    Call::new("SpaceCenter", "Vessel_Flight")
        .arg(
            &TypeDescriptor::class("SpaceCenter", "Vessel"),
            &jeb_core::Value::Object(vessel),
        )
        .unwrap()
        .returns(TypeDescriptor::class("SpaceCenter", "Flight"))
}

#[tokio::test]
async fn test_handle_from_closed_connection_is_refused() {
    let server = MockServer::builder()
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .returns("SpaceCenter", "Vessel_Flight", [0x0B])
        .start()
        .await
        .unwrap();

    let first = Connection::connect(&server.addr()).await.unwrap();
    let vessel = first
        .call(&active_vessel())
        .await
        .unwrap()
        .and_then(|v| v.into_object())
        .unwrap();
    first.close().await.unwrap();

    let second = Connection::connect(&server.addr()).await.unwrap();
    let err = second.call(&vessel_flight(vessel)).await.unwrap_err();

    assert!(matches!(err, CallError::Transport(TransportError::Closed)));
    assert!(!second.is_closed());
    assert!(server.calls().iter().all(|c| c.procedure != "Vessel_Flight"));
}

#[tokio::test]
async fn test_handle_is_tied_to_its_connection() {
    let server = MockServer::builder()
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .returns("SpaceCenter", "Vessel_Flight", [0x0B])
        .start()
        .await
        .unwrap();

    let first = Connection::connect(&server.addr()).await.unwrap();
    let second = Connection::connect(&server.addr()).await.unwrap();
    let vessel = first
        .call(&active_vessel())
        .await
        .unwrap()
        .and_then(|v| v.into_object())
        .unwrap();

    let err = second.call(&vessel_flight(vessel.clone())).await.unwrap_err();
    assert!(matches!(err, CallError::ForeignObject(7)));

    let flight = first.call(&vessel_flight(vessel)).await.unwrap();
    assert_eq!(flight.and_then(|v| v.into_object()).map(|h| h.id()), Some(11));

    // A bare id is not tied to any connection.
    let detached = second
        .call(&vessel_flight(jeb_core::RemoteObject::detached(7)))
        .await
        .unwrap();
    assert_eq!(detached.and_then(|v| v.into_object()).map(|h| h.id()), Some(11));
}

#[tokio::test]
async fn test_timeout_closes_connection() {
    let server = MockServer::builder()
        .response_delay(Duration::from_millis(200))
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();
    let vessel = connection
        .call(&active_vessel())
        .await
        .unwrap()
        .and_then(|v| v.into_object())
        .unwrap();

    let err = connection
        .call_with_timeout(&active_vessel(), Duration::from_millis(20))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Transport(TransportError::TimedOut(d)) if d == Duration::from_millis(20)
    ));
    assert!(connection.is_closed());
    assert!(matches!(
        connection.call(&active_vessel()).await,
        Err(CallError::Transport(TransportError::Closed))
    ));
    assert!(matches!(vessel.connection(), Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_configured_call_timeout_applies() {
    let server = MockServer::builder()
        .response_delay(Duration::from_millis(500))
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let config = ConnectionConfig::default().with_call_timeout(Duration::from_millis(50));
    let connection = Connection::connect_with(&server.addr(), config).await.unwrap();

    let err = connection.call(&active_vessel()).await.unwrap_err();

    assert!(matches!(
        err,
        CallError::Transport(TransportError::TimedOut(_))
    ));
    assert!(connection.is_closed());
}

#[tokio::test]
async fn test_abandoned_call_desynchronizes_connection() {
    let server = MockServer::builder()
        .response_delay(Duration::from_millis(300))
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), connection.call(&active_vessel())).await;
    assert!(abandoned.is_err());

    let err = connection.call(&active_vessel()).await.unwrap_err();
    assert!(matches!(
        err,
        CallError::Transport(TransportError::Desynchronized)
    ));
    assert!(connection.is_closed());
}

#[tokio::test]
async fn test_clones_share_one_socket() {
    let server = MockServer::builder()
        .response_delay(Duration::from_millis(10))
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call(&active_vessel()).await })
        })
        .collect();

    for task in tasks {
        let vessel = task.await.unwrap().unwrap().unwrap();
        assert_eq!(vessel.as_object().map(|h| h.id()), Some(7));
    }

    assert_eq!(server.connection_requests().len(), 1);
    assert_eq!(server.calls().len(), 4);
}

#[derive(Default)]
struct CountingObserver {
    sent: AtomicUsize,
    received: AtomicUsize,
    sent_requests: AtomicUsize,
}

impl MessageObserver for CountingObserver {
    fn message_sent(&self, kind: MessageKind, _payload_len: usize) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if kind == MessageKind::Request {
            self.sent_requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message_received(&self, _kind: MessageKind, _payload_len: usize) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_observer_sees_every_message() {
    let server = MockServer::builder()
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .start()
        .await
        .unwrap();

    let observer = Arc::new(CountingObserver::default());
    let mut config = ConnectionConfig::default();
    config.observer = observer.clone();
    let connection = Connection::connect_with(&server.addr(), config).await.unwrap();

    connection.call(&active_vessel()).await.unwrap();
    connection
        .batch(&[active_vessel(), active_vessel()])
        .await
        .unwrap();

    // Handshake plus two requests, each way.
    assert_eq!(observer.sent.load(Ordering::SeqCst), 3);
    assert_eq!(observer.received.load(Ordering::SeqCst), 3);
    assert_eq!(observer.sent_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_oversized_response_closes_connection() {
    let server = MockServer::builder()
        .returns("KRPC", "GetServices", vec![0u8; 4096])
        .start()
        .await
        .unwrap();

    let config = ConnectionConfig::default().with_max_message_size(1024);
    let connection = Connection::connect_with(&server.addr(), config).await.unwrap();

    let err = connection
        .call_raw(&Call::new("KRPC", "GetServices"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Transport(TransportError::MessageTooLarge { limit: 1024, .. })
    ));
    assert!(connection.is_closed());
}
