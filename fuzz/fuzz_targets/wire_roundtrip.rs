//! Fuzz target for message framing.
//!
//! Encodes arbitrary field lists and checks the parser recovers them
//! byte for byte.

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use sandstone::protocol::encode_message;
use sandstone::RequestParser;

#[derive(Arbitrary, Debug)]
struct FuzzMessage {
    fields: Vec<Vec<u8>>,
}

fuzz_target!(|msg: FuzzMessage| {
    let mut wire = BytesMut::new();
    encode_message(&mut wire, msg.fields.iter().map(|f| f.as_slice()));

    let mut parser = RequestParser::new();
    parser.extend(&wire);

    if msg.fields.is_empty() {
        // A message with no fields is a bare blank line, which the
        // parser swallows as keep-alive noise
        assert!(matches!(parser.parse(), Ok(None)));
        return;
    }

    let req = parser.parse().unwrap().unwrap();
    assert_eq!(req.len(), msg.fields.len());
    for (i, field) in msg.fields.iter().enumerate() {
        assert_eq!(&req[i][..], &field[..]);
    }
    assert!(parser.is_empty());
});
