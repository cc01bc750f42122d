use std::collections::HashMap;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

use crate::diagnostic::Diagnostic;
use crate::error::ClientError;
use crate::RuntimeClient;

/// Status code and headers sent ahead of a streamed response body.
///
/// The prelude is serialized to JSON and separated from the body by eight
/// `0x00` bytes on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePrelude {
    /// The HTTP status code the integration should return.
    #[serde(with = "http_serde::status_code")]
    pub status_code: StatusCode,
    /// Single-value response headers.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Multi-value response headers.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub multi_value_headers: HashMap<String, Vec<String>>,
}

impl Default for ResponsePrelude {
    fn default() -> Self {
        ResponsePrelude {
            status_code: StatusCode::OK,
            headers: HashMap::new(),
            multi_value_headers: HashMap::new(),
        }
    }
}

impl ResponsePrelude {
    /// A prelude with the given status code and no headers.
    pub fn with_status(status_code: StatusCode) -> Self {
        ResponsePrelude {
            status_code,
            ..Default::default()
        }
    }

    /// Add a single-value header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub(crate) const PRELUDE_SEPARATOR: [u8; 8] = [0; 8];

/// Writes the response for the invocation returned alongside it.
///
/// The writer borrows the runtime client for the duration of the invocation;
/// it cannot outlive the handler call it was passed to. Every response must
/// end in exactly one terminal call: [`finish`](Self::finish),
/// [`write_and_finish`](Self::write_and_finish), or
/// [`report_error`](Self::report_error).
pub struct ResponseWriter<'a> {
    client: &'a mut RuntimeClient,
}

impl<'a> ResponseWriter<'a> {
    pub(crate) fn new(client: &'a mut RuntimeClient) -> ResponseWriter<'a> {
        ResponseWriter { client }
    }

    /// Send the status-and-headers prelude.
    ///
    /// Only valid as the very first write of a response; it switches the
    /// response into streaming mode.
    pub async fn write_status_and_headers(
        &mut self,
        prelude: ResponsePrelude,
    ) -> Result<(), ClientError> {
        let mut buf = serde_json::to_vec(&prelude)?;
        buf.extend_from_slice(&PRELUDE_SEPARATOR);
        self.client.write_response_part(buf.into(), true).await
    }

    /// Stream one chunk of the response body.
    ///
    /// The first body write sends the streaming response head; every write
    /// after that appends a chunk.
    pub async fn write(&mut self, bytes: impl Into<Bytes>) -> Result<(), ClientError> {
        self.client.write_response_part(bytes.into(), false).await
    }

    /// Complete the response without further body data.
    pub async fn finish(&mut self) -> Result<(), ClientError> {
        self.client.finish_response(None).await
    }

    /// Send `bytes` and complete the response in one step.
    ///
    /// When this is the only write of the response and the body is smaller
    /// than 6 MB, the response goes out buffered with a `Content-Length`;
    /// otherwise it is streamed.
    pub async fn write_and_finish(&mut self, bytes: impl Into<Bytes>) -> Result<(), ClientError> {
        self.client.finish_response(Some(bytes.into())).await
    }

    /// Report a failure for the current invocation.
    ///
    /// Before any body write this posts the error to the control plane's
    /// `/error` endpoint; after streaming has started it terminates the
    /// stream with error trailers.
    pub async fn report_error(
        &mut self,
        diagnostic: impl Into<Diagnostic>,
    ) -> Result<(), ClientError> {
        self.client.report_invocation_error(diagnostic.into()).await
    }
}

impl std::fmt::Debug for ResponseWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_serializes_status_and_headers() {
        let prelude = ResponsePrelude::with_status(StatusCode::OK).header("x", "y");
        let json = serde_json::to_string(&prelude).unwrap();
        assert_eq!(json, r#"{"statusCode":200,"headers":{"x":"y"}}"#);
    }

    #[test]
    fn prelude_skips_empty_header_maps() {
        let prelude = ResponsePrelude::with_status(StatusCode::NOT_FOUND);
        let json = serde_json::to_string(&prelude).unwrap();
        assert_eq!(json, r#"{"statusCode":404}"#);
    }

    #[test]
    fn prelude_keeps_multi_value_headers() {
        let mut prelude = ResponsePrelude::default();
        prelude
            .multi_value_headers
            .insert("set-cookie".to_string(), vec!["a=1".to_string(), "b=2".to_string()]);
        let json = serde_json::to_string(&prelude).unwrap();
        assert!(json.contains(r#""multiValueHeaders":{"set-cookie":["a=1","b=2"]}"#));
    }

    #[test]
    fn prelude_does_not_escape_slashes() {
        let prelude = ResponsePrelude::default().header("content-type", "text/html");
        let json = serde_json::to_string(&prelude).unwrap();
        assert!(json.contains(r#""content-type":"text/html""#));
    }
}
