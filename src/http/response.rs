use serde::{Deserialize, Serialize};

use super::Headers;

/// A response produced by a fetch listener or stored in a cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: Headers,
    /// Raw body.
    #[serde(default, with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    /// Plain-text failure response used at the HTTP boundary.
    pub fn error(status: u16, message: &str) -> Self {
        Self::new(status, message.as_bytes().to_vec())
            .with_header("content-type", "text/plain; charset=utf-8")
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// True for 2xx statuses.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_is_plain_text() {
        let res = Response::error(503, "no active worker");
        assert_eq!(res.status, 503);
        assert!(!res.is_ok());
        assert_eq!(res.text(), "no active worker");
        assert_eq!(res.headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
    }
}
