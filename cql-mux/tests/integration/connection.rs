use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use cql_mux::errors::{BrokenConnectionErrorKind, RequestError};
use cql_mux::{Connection, ConnectionConfig, ExhaustionPolicy};
use cql_wire::frame::request::{Prepare, Query};
use cql_wire::frame::response::ResponseOpcode;
use cql_wire::frame::{types, FLAG_WARNING};
use cql_wire::ProtocolVersion;

use crate::utils::{setup_tracing, FakeServer, OPCODE_READY, OPCODE_RESULT};

fn statement_text(body: &[u8]) -> String {
    types::read_long_string(&mut &body[..]).unwrap().to_owned()
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn responses_out_of_order_reach_their_requests() {
    setup_tracing();
    for version in [ProtocolVersion::V2, ProtocolVersion::V3, ProtocolVersion::V4] {
        let (client, server) = tokio::io::duplex(1 << 16);
        let config = ConnectionConfig {
            protocol_version: version,
            ..Default::default()
        };
        let (connection, _error_receiver) = Connection::new(client, config);
        let connection = Arc::new(connection);
        let mut server = FakeServer::new(server, version);

        let requests: Vec<_> = (0..20)
            .map(|i| {
                let connection = Arc::clone(&connection);
                tokio::spawn(async move {
                    let text = format!("SELECT {i}");
                    let response = connection.prepare(&text).await.unwrap();
                    (text, response)
                })
            })
            .collect();

        let mut received = Vec::new();
        for _ in 0..20 {
            received.push(server.read_request().await);
        }
        let streams: HashSet<i16> = received.iter().map(|r| r.stream).collect();
        assert_eq!(streams.len(), 20, "in-flight requests share a stream id");

        // Echo the statement text back, newest request first.
        for request in received.iter().rev() {
            assert_eq!(request.opcode, 0x09);
            let mut body = Vec::new();
            types::write_long_string(&statement_text(&request.body), &mut body).unwrap();
            server.respond(request.stream, OPCODE_RESULT, 0, &body).await;
        }

        for request in requests {
            let (text, response) = request.await.unwrap();
            assert_eq!(response.opcode, ResponseOpcode::Result);
            assert_eq!(statement_text(&response.body), text);
        }
        assert_eq!(connection.pending_requests(), 0);
        assert_eq!(connection.multiplexer().in_use_count(), 0);
    }
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn waiting_policy_queues_when_ids_run_out() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let config = ConnectionConfig {
        protocol_version: ProtocolVersion::V2,
        exhaustion_policy: ExhaustionPolicy::Wait,
        ..Default::default()
    };
    let (connection, _error_receiver) = Connection::new(client, config);
    let connection = Arc::new(connection);
    let mut server = FakeServer::new(server, ProtocolVersion::V2);

    // Occupy all ids but one.
    for _ in 0..127 {
        connection.multiplexer().allocate().unwrap();
    }

    let first = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.query("SELECT 1").await }
    });
    let request = server.read_request().await;
    assert_eq!(request.stream, 127);

    let second = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.query("SELECT 2").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    server.respond(127, OPCODE_RESULT, 0, &[0, 0, 0, 1]).await;
    assert_eq!(first.await.unwrap().unwrap().opcode, ResponseOpcode::Result);

    let request = server.read_request().await;
    assert_eq!(request.stream, 127);
    assert_eq!(statement_text(&request.body), "SELECT 2");
    server.respond(127, OPCODE_READY, 0, &[]).await;
    assert_eq!(second.await.unwrap().unwrap().opcode, ResponseOpcode::Ready);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn broken_transport_fails_all_pending_requests() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (connection, error_receiver) = Connection::new(client, ConnectionConfig::default());
    let connection = Arc::new(connection);
    let mut server = FakeServer::new(server, ProtocolVersion::V4);

    let requests: Vec<_> = (0..5)
        .map(|i| {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .send_request(Prepare::new(format!("SELECT {i}")))
                    .await
            })
        })
        .collect();
    for _ in 0..5 {
        server.read_request().await;
    }
    assert_eq!(connection.pending_requests(), 5);

    drop(server.into_inner());

    for request in requests {
        assert_matches!(request.await.unwrap(), Err(RequestError::BrokenConnection(_)));
    }
    let error = error_receiver.await.unwrap();
    assert_matches!(
        error.downcast_ref::<BrokenConnectionErrorKind>(),
        Some(BrokenConnectionErrorKind::FrameHeaderParseError(_))
    );
    assert_eq!(connection.pending_requests(), 0);
    assert_eq!(connection.multiplexer().in_use_count(), 0);

    assert_matches!(
        connection.query("SELECT 1").await,
        Err(RequestError::BrokenConnection(_))
    );
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn unknown_stream_does_not_break_the_connection() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (connection, mut error_receiver) = Connection::new(client, ConnectionConfig::default());
    let connection = Arc::new(connection);
    let mut server = FakeServer::new(server, ProtocolVersion::V4);

    server.respond(1000, OPCODE_RESULT, 0, &[]).await;
    // Reserved negative streams other than the event stream are ignored too.
    server.respond(-5, OPCODE_RESULT, 0, &[]).await;

    let request = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.options().await }
    });
    let received = server.read_request().await;
    assert_eq!(received.opcode, 0x05);
    assert!(received.body.is_empty());
    server.respond(received.stream, 0x06, 0, &[0, 0]).await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.opcode, ResponseOpcode::Supported);
    assert!(error_receiver.try_recv().is_err());
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn warnings_are_split_off_the_body() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (connection, _error_receiver) = Connection::new(client, ConnectionConfig::default());
    let connection = Arc::new(connection);
    let mut server = FakeServer::new(server, ProtocolVersion::V4);

    let request = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move {
            connection
                .send_request_and_parse(Query::new("SELECT * FROM big_table"))
                .await
        }
    });
    let received = server.read_request().await;
    assert_eq!(received.opcode, 0x07);

    let mut body = Vec::new();
    types::write_string_list(&["Aggregation query used without partition key"], &mut body)
        .unwrap();
    body.extend_from_slice(&[0, 0, 0, 1]);
    server
        .respond(received.stream, OPCODE_RESULT, FLAG_WARNING, &body)
        .await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(
        response.warnings,
        vec!["Aggregation query used without partition key".to_owned()]
    );
    assert_eq!(&response.body[..], &[0, 0, 0, 1]);
}

#[tokio::test]
#[ntest::timeout(10000)]
async fn garbage_from_server_breaks_the_connection() {
    setup_tracing();
    let (client, server) = tokio::io::duplex(1 << 16);
    let (_connection, error_receiver) = Connection::new(client, ConnectionConfig::default());
    let mut server = FakeServer::new(server, ProtocolVersion::V4);

    // Direction bit unset: a request frame coming from the server.
    server.send_raw(&[0x04, 0, 0, 1, 0x02, 0, 0, 0, 0]).await;

    let error = error_receiver.await.unwrap();
    assert_matches!(
        error.downcast_ref::<BrokenConnectionErrorKind>(),
        Some(BrokenConnectionErrorKind::FrameHeaderParseError(_))
    );
}
