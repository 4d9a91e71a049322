//! Wire-level integration tests for the framing contract.

use rudder_common::protocol::{
    framing, Header, Message, Metadata, HEADER_SIZE, MAGIC_NUMBER, SERIALIZATION_JSON,
    TYPE_REQUEST,
};

#[test]
fn test_wire_round_trip_contract() {
    let payload = b"{\"test\":\"data\"}".to_vec();
    let message = Message::request(1, SERIALIZATION_JSON)
        .with_metadata(Metadata::call("TestService", "TestMethod").with_extra("key", "value"))
        .with_payload(payload.clone());

    let bytes = framing::encode_to_vec(&message).unwrap();

    // The frame opens with the fixed-size header.
    assert!(bytes.len() > HEADER_SIZE);
    let header = Header::decode(&bytes[..HEADER_SIZE].try_into().unwrap()).unwrap();
    assert_eq!(header.magic, MAGIC_NUMBER);
    assert_eq!(header.version, 1);
    assert_eq!(header.message_type, TYPE_REQUEST);
    assert_eq!(header.compress_type, 0);
    assert_eq!(header.serialization_type, SERIALIZATION_JSON);
    assert_eq!(header.message_id, 1);
    assert_eq!(header.payload_size, 15);
    assert_eq!(
        bytes.len(),
        HEADER_SIZE + header.metadata_size as usize + header.payload_size as usize
    );

    // Decoding restores header fields, metadata fields and payload bytes.
    let decoded = framing::decode_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded.header, header);

    let metadata = decoded.metadata.expect("metadata present");
    assert_eq!(metadata.service_name, "TestService");
    assert_eq!(metadata.method_name, "TestMethod");
    assert_eq!(metadata.extra["key"], "value");
    assert_eq!(decoded.payload, payload);
}

#[tokio::test]
async fn test_framing_over_tcp() {
    use tokio::net::{TcpListener, TcpStream};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = framing::decode_from_async(&mut stream).await.unwrap();

        let reply = Message::response(request.header.message_id, SERIALIZATION_JSON)
            .with_metadata(Metadata::call("TestService", "TestMethod"))
            .with_payload(request.payload);
        framing::encode_to_async(&reply, &mut stream).await.unwrap();
    });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = Message::request(77, SERIALIZATION_JSON)
        .with_metadata(Metadata::call("TestService", "TestMethod"))
        .with_payload(b"ping".to_vec());
    framing::encode_to_async(&request, &mut stream).await.unwrap();

    let reply = framing::decode_from_async(&mut stream).await.unwrap();
    assert_eq!(reply.header.message_id, 77);
    assert_eq!(reply.payload, b"ping");
    assert!(reply.error().is_none());

    server.await.unwrap();
}
