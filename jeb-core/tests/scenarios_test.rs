//! End-to-end flows against a mock server speaking the real wire protocol.
use jeb_core::prost::Message;
use jeb_core::proto;
use jeb_core::{Call, Connection, RemoteObject, TypeDescriptor, Value};
use jeb_mock::{MockServer, Reply};

fn flight_type() -> TypeDescriptor {
    TypeDescriptor::class("SpaceCenter", "Flight")
}

#[tokio::test]
async fn test_status_round_trip() {
    let server = MockServer::builder()
        .returns(
            "KRPC",
            "GetStatus",
            proto::Status {
                version: "0.5.4".to_string(),
                bytes_read: 1024,
                bytes_written: 2048,
                ..Default::default()
            }
            .encode_to_vec(),
        )
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();
    let bytes = connection
        .call_raw(&Call::new("KRPC", "GetStatus"))
        .await
        .unwrap();
    let status = proto::Status::decode(bytes.as_slice()).unwrap();

    assert_eq!(status.version, "0.5.4");
    assert_eq!(status.bytes_read, 1024);
    assert_eq!(status.bytes_written, 2048);
}

#[tokio::test]
async fn test_handle_flows_back_as_argument() {
    let server = MockServer::builder()
        .returns("SpaceCenter", "get_ActiveVessel", [0x07])
        .procedure("SpaceCenter", "Vessel_Flight", |call| {
            // Flight 11 belongs to vessel 7.
            match call.arguments.first().map(|a| a.value.as_slice()) {
                Some([0x07]) => Reply::Value(vec![0x0b]),
                _ => Reply::Error("No such vessel".to_string()),
            }
        })
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();

    let vessel = connection
        .call(
            &Call::new("SpaceCenter", "get_ActiveVessel")
                .returns(TypeDescriptor::class("SpaceCenter", "Vessel")),
        )
        .await
        .unwrap()
        .and_then(Value::into_object)
        .unwrap();
    assert_eq!(vessel.id(), 7);
    assert!(vessel.belongs_to(&connection));

    let flight_call = Call::new("SpaceCenter", "Vessel_Flight")
        .arg(
            &TypeDescriptor::class("SpaceCenter", "Vessel"),
            &Value::Object(vessel),
        )
        .unwrap()
        .returns(flight_type());
    let flight = connection
        .call(&flight_call)
        .await
        .unwrap()
        .and_then(Value::into_object)
        .unwrap();

    assert_eq!(flight.id(), 11);
    assert_eq!(server.calls()[1].arguments[0].position, 0);
}

#[tokio::test]
async fn test_surface_altitude_is_little_endian_double() {
    let altitude: f64 = 75_312.25;
    let server = MockServer::builder()
        .returns(
            "SpaceCenter",
            "Flight_get_SurfaceAltitude",
            altitude.to_le_bytes(),
        )
        .start()
        .await
        .unwrap();

    let connection = Connection::connect(&server.addr()).await.unwrap();
    let call = Call::new("SpaceCenter", "Flight_get_SurfaceAltitude")
        .arg(&flight_type(), &Value::Object(RemoteObject::detached(11)))
        .unwrap()
        .returns(TypeDescriptor::Float64);

    let value = connection.call(&call).await.unwrap().unwrap();

    assert_eq!(value, Value::Float64(altitude));
    assert_eq!(server.calls()[0].arguments[0].value, vec![0x0b]);
}
