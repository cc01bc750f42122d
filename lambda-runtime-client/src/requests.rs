use bytes::Bytes;
use http::{Method, Request, Uri};

use crate::body::Body;
use crate::diagnostic::Diagnostic;
use crate::error::ClientError;

const USER_AGENT_HEADER: &str = "User-Agent";
const DEFAULT_USER_AGENT: &str = concat!("aws-lambda-rust/", env!("CARGO_PKG_VERSION"));
const CUSTOM_USER_AGENT: Option<&str> = option_env!("LAMBDA_RUNTIME_USER_AGENT");

pub(crate) const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";
pub(crate) const ERROR_BODY_TRAILER: &str = "lambda-runtime-function-error-body";
pub(crate) const RESPONSE_MODE_HEADER: &str = "lambda-runtime-function-response-mode";
pub(crate) const STREAMING_CONTENT_TYPE: &str = "application/vnd.awslambda.http-integration-response";

const UNHANDLED: &str = "Unhandled";

/// Create a request builder with the default `User-Agent` set.
/// Configure the `LAMBDA_RUNTIME_USER_AGENT` environment variable at compile
/// time to override the value.
pub(crate) fn build_request() -> http::request::Builder {
    const USER_AGENT: &str = match CUSTOM_USER_AGENT {
        Some(value) => value,
        None => DEFAULT_USER_AGENT,
    };
    Request::builder().header(USER_AGENT_HEADER, USER_AGENT)
}

pub(crate) trait IntoRequest {
    fn into_req(self) -> Result<Request<Body>, ClientError>;
}

// /runtime/invocation/next
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct NextEventRequest;

impl IntoRequest for NextEventRequest {
    fn into_req(self) -> Result<Request<Body>, ClientError> {
        let req = build_request()
            .method(Method::GET)
            .uri(Uri::from_static("/2018-06-01/runtime/invocation/next"))
            .body(Body::empty())?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/response, buffered
pub(crate) struct EventCompletionRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) body: Bytes,
}

impl<'a> IntoRequest for EventCompletionRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, ClientError> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/response", self.request_id);
        let req = build_request()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(self.body))?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/response, streamed
pub(crate) struct StreamingResponseRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) has_custom_headers: bool,
    pub(crate) body: Body,
}

impl<'a> IntoRequest for StreamingResponseRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, ClientError> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/response", self.request_id);
        let mut builder = build_request()
            .method(Method::POST)
            .uri(uri)
            .header("Transfer-Encoding", "chunked")
            .header(RESPONSE_MODE_HEADER, "streaming")
            // Mid-stream errors are reported through trailers, see
            // https://docs.aws.amazon.com/lambda/latest/dg/runtimes-custom.html#runtimes-custom-response-streaming
            .header("Trailer", ERROR_TYPE_HEADER)
            .header("Trailer", ERROR_BODY_TRAILER);
        if self.has_custom_headers {
            builder = builder.header("Content-Type", STREAMING_CONTENT_TYPE);
        }
        let req = builder.body(self.body)?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/error
pub(crate) struct EventErrorRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) diagnostic: Diagnostic,
}

impl<'a> IntoRequest for EventErrorRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, ClientError> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/error", self.request_id);
        let body = serde_json::to_vec(&self.diagnostic)?;
        let req = build_request()
            .method(Method::POST)
            .uri(uri)
            .header(ERROR_TYPE_HEADER, UNHANDLED)
            .body(Body::from(body))?;
        Ok(req)
    }
}

// /runtime/init/error
pub(crate) struct InitErrorRequest {
    pub(crate) diagnostic: Diagnostic,
}

impl IntoRequest for InitErrorRequest {
    fn into_req(self) -> Result<Request<Body>, ClientError> {
        let body = serde_json::to_vec(&self.diagnostic)?;
        let req = build_request()
            .method(Method::POST)
            .uri(Uri::from_static("/2018-06-01/runtime/init/error"))
            .header(ERROR_TYPE_HEADER, UNHANDLED)
            .body(Body::from(body))?;
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_default_user_agent(req: &Request<Body>) -> bool {
        match req.headers().get("User-Agent") {
            Some(header) => header.to_str().unwrap().starts_with("aws-lambda-rust/"),
            None => false,
        }
    }

    #[test]
    fn test_next_event_request() {
        let req = NextEventRequest.into_req().unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/invocation/next"));
        assert!(has_default_user_agent(&req));
    }

    #[test]
    fn test_event_completion_request() {
        let req = EventCompletionRequest {
            request_id: "id",
            body: Bytes::from_static(b"hello, world!"),
        };
        let req = req.into_req().unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/invocation/id/response"));
        assert!(has_default_user_agent(&req));
    }

    #[test]
    fn test_streaming_response_request() {
        let req = StreamingResponseRequest {
            request_id: "id",
            has_custom_headers: false,
            body: Body::empty(),
        };
        let req = req.into_req().unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/invocation/id/response"));
        assert_eq!(req.headers()["Transfer-Encoding"], "chunked");
        assert_eq!(req.headers()[RESPONSE_MODE_HEADER], "streaming");
        let trailers: Vec<_> = req.headers().get_all("Trailer").iter().collect();
        assert_eq!(trailers.len(), 2);
        assert!(req.headers().get("Content-Type").is_none());
    }

    #[test]
    fn test_streaming_response_request_with_custom_headers() {
        let req = StreamingResponseRequest {
            request_id: "id",
            has_custom_headers: true,
            body: Body::empty(),
        };
        let req = req.into_req().unwrap();
        assert_eq!(req.headers()["Content-Type"], STREAMING_CONTENT_TYPE);
    }

    #[test]
    fn test_event_error_request() {
        let req = EventErrorRequest {
            request_id: "id",
            diagnostic: Diagnostic::new("InvalidEventDataError", "Error parsing event data"),
        };
        let req = req.into_req().unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/invocation/id/error"));
        assert_eq!(req.headers()[ERROR_TYPE_HEADER], "Unhandled");
        assert!(has_default_user_agent(&req));
    }

    #[test]
    fn test_init_error_request() {
        let req = InitErrorRequest {
            diagnostic: Diagnostic::new("runtime.InitError", "handler construction failed"),
        };
        let req = req.into_req().unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/init/error"));
        assert_eq!(req.headers()[ERROR_TYPE_HEADER], "Unhandled");
    }
}
