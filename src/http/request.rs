use serde::{Deserialize, Serialize};

use super::Headers;

/// An inbound request, or the request half of a cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Upper-case method (`GET`, `POST`, ...).
    pub method: String,
    /// Absolute or path-only URL.
    pub url: String,
    /// Request headers.
    #[serde(default)]
    pub headers: Headers,
    /// Raw body.
    #[serde(default, with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl Request {
    /// Creates a request with an upper-cased method and no headers/body.
    pub fn new(method: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: url.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// URL with any `#fragment` removed.
    pub fn url_without_fragment(&self) -> &str {
        match self.url.split_once('#') {
            Some((head, _)) => head,
            None => &self.url,
        }
    }

    /// URL with fragment and `?query` removed.
    pub fn url_without_search(&self) -> &str {
        let url = self.url_without_fragment();
        match url.split_once('?') {
            Some((head, _)) => head,
            None => url,
        }
    }
}
