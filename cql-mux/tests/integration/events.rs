use std::time::Duration;

use cql_mux::{Connection, ConnectionConfig};
use cql_wire::frame::response::ResponseOpcode;
use cql_wire::frame::server_event_type::EventType;
use cql_wire::frame::types;
use cql_wire::ProtocolVersion;
use tokio::sync::mpsc;

use crate::utils::{setup_tracing, FakeServer, OPCODE_EVENT, OPCODE_READY};

#[tokio::test]
#[ntest::timeout(10000)]
async fn events_are_forwarded_to_the_event_channel() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (event_sender, mut event_receiver) = mpsc::channel(8);
    let config = ConnectionConfig {
        protocol_version: ProtocolVersion::V3,
        event_sender: Some(event_sender),
        ..Default::default()
    };
    let (connection, _error_receiver) = Connection::new(client, config);
    let mut server = FakeServer::new(server, ProtocolVersion::V3);

    let register = connection.register(vec![EventType::SchemaChange, EventType::StatusChange]);
    let serve = async {
        let received = server.read_request().await;
        assert_eq!(received.opcode, 0x0B);
        assert_eq!(
            types::read_string_list(&mut &received.body[..]).unwrap(),
            vec!["SCHEMA_CHANGE".to_owned(), "STATUS_CHANGE".to_owned()]
        );
        server.respond(received.stream, OPCODE_READY, 0, &[]).await;

        let mut event = Vec::new();
        types::write_string("STATUS_CHANGE", &mut event).unwrap();
        server.respond(-1, OPCODE_EVENT, 0, &event).await;
    };
    let (response, ()) = tokio::join!(register, serve);
    assert_eq!(response.unwrap().opcode, ResponseOpcode::Ready);

    let event = tokio::time::timeout(Duration::from_secs(5), event_receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.stream(), -1);
    assert_eq!(event.opcode, ResponseOpcode::Event);
    assert_eq!(types::read_string(&mut &event.body[..]).unwrap(), "STATUS_CHANGE");
    assert_eq!(connection.multiplexer().in_use_count(), 0);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn events_without_a_listener_are_dropped() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (connection, mut error_receiver) = Connection::new(client, ConnectionConfig::default());
    let mut server = FakeServer::new(server, ProtocolVersion::V4);

    server.respond(-1, OPCODE_EVENT, 0, &[0, 0]).await;

    let options = connection.options();
    let serve = async {
        let received = server.read_request().await;
        server.respond(received.stream, 0x06, 0, &[0, 0]).await;
    };
    let (response, ()) = tokio::join!(options, serve);
    assert_eq!(response.unwrap().opcode, ResponseOpcode::Supported);
    assert!(error_receiver.try_recv().is_err());
}
