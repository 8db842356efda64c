//! HTTP request model.
//!
//! The ESP-IDF server hands us a method and a raw URI; everything the
//! router needs is extracted here so routing can be tested on the host.

use percent_encoding::percent_decode_str;
use url::{form_urlencoded, Url};

/// Base used to resolve request URIs.  Only the path and query matter.
const BASE: &str = "http://emondc.local";

/// Largest urlencoded form body read for a settings POST.
pub const MAX_FORM_BODY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Options,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Percent-decoded path with dot segments resolved.
    pub path: String,
    /// Query pairs first, then urlencoded form fields from the body.
    params: Vec<(String, String)>,
    /// Raw request body.  File uploads to `/sd/` keep it as content;
    /// every other POST also has it decoded as a form.
    pub body: Vec<u8>,
}

impl Request {
    /// Parse `uri` (path plus optional query).  Unparseable URIs map to
    /// path `/` with no parameters.
    pub fn parse(method: Method, uri: &str) -> Self {
        let url = Url::parse(BASE).and_then(|base| base.join(uri));
        let (path, params) = match url {
            Ok(url) => (
                normalise(&percent_decode_str(url.path()).decode_utf8_lossy()),
                url.query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
            Err(_) => ("/".to_owned(), Vec::new()),
        };
        Self {
            method,
            path,
            params,
            body: Vec::new(),
        }
    }

    /// Attach the request body.  A POST outside `/sd/` is a settings form,
    /// so its fields join the query parameters.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        if self.is_form_post() {
            self.params.extend(
                form_urlencoded::parse(&self.body).map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }
        self
    }

    /// Whether the body of this request carries form fields.
    pub fn is_form_post(&self) -> bool {
        self.method == Method::Post && !self.path.starts_with("/sd/")
    }

    /// First value of parameter `name`, query before body.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `name`, or the empty string when absent.
    pub fn arg_or_empty(&self, name: &str) -> &str {
        self.arg(name).unwrap_or("")
    }

}

/// Resolve `.` and `..` segments that only appear after decoding
/// (`%2f..%2f`).  The result always starts with `/`.
fn normalise(path: &str) -> String {
    let mut segs: Vec<&str> = Vec::new();
    for seg in path.split('/').skip(1) {
        match seg {
            "." => {}
            ".." => {
                segs.pop();
            }
            s => segs.push(s),
        }
    }
    format!("/{}", segs.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_slashes_cannot_climb_out() {
        let r = Request::parse(Method::Get, "/sd/%2f..%2f..%2fetc");
        assert_eq!(r.path, "/etc");
        let r = Request::parse(Method::Get, "/sd/");
        assert_eq!(r.path, "/sd/");
    }

    #[test]
    fn query_parameters_are_decoded() {
        let r = Request::parse(Method::Get, "/savenetwork?ssid=my%20net&pass=a+b");
        assert_eq!(r.path, "/savenetwork");
        assert_eq!(r.arg("ssid"), Some("my net"));
        assert_eq!(r.arg("pass"), Some("a b"));
        assert_eq!(r.arg("missing"), None);
        assert_eq!(r.arg_or_empty("missing"), "");
    }

    #[test]
    fn settime_value_survives_parsing() {
        let r = Request::parse(Method::Get, "/settime?time=2024-01-01T00:00:00Z");
        assert_eq!(r.arg("time"), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn dot_segments_are_resolved() {
        let r = Request::parse(Method::Get, "/sd/logs/../../secret");
        assert_eq!(r.path, "/secret");
    }

    #[test]
    fn path_is_percent_decoded() {
        let r = Request::parse(Method::Delete, "/sd/my%20file.csv");
        assert_eq!(r.path, "/sd/my file.csv");
        assert_eq!(r.method, Method::Delete);
    }

    #[test]
    fn bare_path_has_no_params() {
        let r = Request::parse(Method::Get, "/status");
        assert_eq!(r.path, "/status");
        assert_eq!(r.arg("x"), None);
    }

    #[test]
    fn form_body_fields_become_arguments() {
        let r = Request::parse(Method::Post, "/savenetwork")
            .with_body("ssid=my+shed&pass=pass%26word1");
        assert_eq!(r.arg("ssid"), Some("my shed"));
        assert_eq!(r.arg("pass"), Some("pass&word1"));
    }

    #[test]
    fn query_wins_over_body_for_the_same_name() {
        let r = Request::parse(Method::Post, "/savedc?interval=5").with_body("interval=30&icalA=1.5");
        assert_eq!(r.arg("interval"), Some("5"));
        assert_eq!(r.arg("icalA"), Some("1.5"));
    }

    #[test]
    fn upload_body_is_not_read_as_a_form() {
        let r = Request::parse(Method::Post, "/sd/data.csv").with_body("a=1,b=2\n");
        assert_eq!(r.arg("a"), None);
        assert_eq!(r.body, b"a=1,b=2\n");
    }

    #[test]
    fn plus_in_a_path_stays_literal() {
        let r = Request::parse(Method::Get, "/sd/a+b%2Bc.csv");
        assert_eq!(r.path, "/sd/a+b+c.csv");
    }
}
