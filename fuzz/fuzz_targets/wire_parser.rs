#![no_main]

use libfuzzer_sys::fuzz_target;
use sandstone::RequestParser;

fuzz_target!(|data: &[u8]| {
    // The parser must never panic, regardless of input
    let mut parser = RequestParser::new();
    parser.extend(data);
    while let Ok(Some(_)) = parser.parse() {}

    // Split delivery must not corrupt parser state
    let mid = data.len() / 2;
    let mut parser = RequestParser::new();
    parser.extend(&data[..mid]);
    let _ = parser.parse();
    parser.extend(&data[mid..]);
    while let Ok(Some(_)) = parser.parse() {}
});
