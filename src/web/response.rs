//! HTTP response model.

use serde::Serialize;

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_JSON: &str = "application/json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Header sent on every response so the UI can be served from elsewhere.
pub const CORS_HEADER: (&str, &str) = ("Access-Control-Allow-Origin", "*");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type,
            headers: vec![(CORS_HEADER.0, CORS_HEADER.1.to_owned())],
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, TEXT_PLAIN, body.into())
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::text(200, body)
    }

    /// Status line only.
    pub fn empty(status: u16) -> Self {
        Self::new(status, TEXT_PLAIN, Vec::new())
    }

    /// Serialize `value` as the JSON body.  A serializer failure becomes 500.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(200, APPLICATION_JSON, body),
            Err(_) => Self::text(500, "serialization failed"),
        }
    }

    pub fn redirect(location: String) -> Self {
        Self::empty(301).with_header("Location", location)
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> &str {
        core::str::from_utf8(&self.body).unwrap_or("")
    }
}

/// What the router hands back to the server glue.
pub enum Reply<F> {
    /// Headers and body are complete.
    Full(Response),
    /// Send `head`, then pull chunks from `session` until it returns 0.
    Stream {
        head: Response,
        session: super::sd::DownloadSession<F>,
    },
}

impl<F> Reply<F> {
    pub fn status(&self) -> u16 {
        match self {
            Self::Full(r) => r.status,
            Self::Stream { head, .. } => head.status,
        }
    }

    /// The complete response, or `None` for a stream.
    pub fn into_full(self) -> Option<Response> {
        match self {
            Self::Full(r) => Some(r),
            Self::Stream { .. } => None,
        }
    }
}

impl<F> From<Response> for Reply<F> {
    fn from(r: Response) -> Self {
        Self::Full(r)
    }
}
