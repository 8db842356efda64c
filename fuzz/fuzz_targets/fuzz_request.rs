//! Fuzz target: `Request::parse`, form bodies + `/settime` parsing
//!
//! Arbitrary URIs from the HTTP server must always yield an absolute path
//! with no `..` segment, and a time that parses must print back the same.
//!
//! cargo fuzz run fuzz_request

#![no_main]

use emondc::rtc::DateTime;
use emondc::web::{Method, Request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Settings forms accept any bytes as a body.
    let form = Request::parse(Method::Post, "/savedc").with_body(data);
    let _ = form.arg("interval");

    let Ok(uri) = std::str::from_utf8(data) else {
        return;
    };

    let req = Request::parse(Method::Get, uri);
    assert!(req.path.starts_with('/'));
    assert!(!req.path.split('/').any(|seg| seg == ".."));

    if let Some(t) = req.arg("time") {
        if let Ok(parsed) = DateTime::parse_iso8601(t) {
            assert_eq!(parsed.to_string(), t.trim());
        }
    }
});
