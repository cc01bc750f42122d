//! Invocations and the metadata the control plane attaches to them.

use bytes::Bytes;
use http::HeaderMap;

use crate::{error::ClientError, xray};

/// Header carrying the request id of the invocation.
pub const HEADER_REQUEST_ID: &str = "lambda-runtime-aws-request-id";
/// Header carrying the invocation deadline in milliseconds since the epoch.
pub const HEADER_DEADLINE_MS: &str = "lambda-runtime-deadline-ms";
/// Header carrying the ARN of the invoked function.
pub const HEADER_FUNCTION_ARN: &str = "lambda-runtime-invoked-function-arn";
/// Header carrying the X-Ray tracing header.
pub const HEADER_TRACE_ID: &str = "lambda-runtime-trace-id";
/// Header carrying the client context sent by the AWS Mobile SDK.
pub const HEADER_CLIENT_CONTEXT: &str = "lambda-runtime-client-context";
/// Header carrying the Cognito identity of the caller.
pub const HEADER_COGNITO_IDENTITY: &str = "lambda-runtime-cognito-identity";
/// Header carrying the tenant id of the invocation.
pub const HEADER_TENANT_ID: &str = "lambda-runtime-aws-tenant-id";

/// Metadata describing a single invocation, derived from the headers of the
/// `/invocation/next` response. Immutable after construction.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub struct InvocationMetadata {
    /// The AWS request id identifying the invocation.
    pub request_id: String,
    /// When the invocation times out, in milliseconds since the Unix epoch.
    pub deadline_ms: i64,
    /// ARN of the function, version, or alias being invoked.
    pub invoked_function_arn: String,
    /// The X-Ray tracing header. Synthesized when the control plane omits it.
    pub trace_id: String,
    /// JSON client context sent by the AWS Mobile SDK, if any.
    pub client_context: Option<String>,
    /// JSON Cognito identity of the caller, if any.
    pub cognito_identity: Option<String>,
    /// Tenant id of the invocation, if any.
    pub tenant_id: Option<String>,
}

impl InvocationMetadata {
    /// Build the metadata from the `/invocation/next` response headers.
    ///
    /// Fails when the request id, deadline, or function ARN is missing. The
    /// errors name the offending header for diagnostics; the client maps
    /// them to [`ClientError::InvocationMissingMetadata`] before failing the
    /// caller waiting on the invocation. A missing trace id is replaced with
    /// a freshly generated one, unsampled.
    pub fn from_headers(headers: &HeaderMap) -> Result<InvocationMetadata, ClientError> {
        let request_id = required_header(headers, HEADER_REQUEST_ID)?;
        let deadline_ms = required_header(headers, HEADER_DEADLINE_MS)?
            .parse::<i64>()
            .map_err(|_| ClientError::InvocationMissingMetadata)?;
        let invoked_function_arn = required_header(headers, HEADER_FUNCTION_ARN)?;
        let trace_id = match optional_header(headers, HEADER_TRACE_ID) {
            Some(trace_id) => trace_id,
            None => format!("Root={};Sampled=0", xray::generate_trace_id()),
        };

        Ok(InvocationMetadata {
            request_id,
            deadline_ms,
            invoked_function_arn,
            trace_id,
            client_context: optional_header(headers, HEADER_CLIENT_CONTEXT),
            cognito_identity: optional_header(headers, HEADER_COGNITO_IDENTITY),
            tenant_id: optional_header(headers, HEADER_TENANT_ID),
        })
    }
}

fn required_header(headers: &HeaderMap, name: &'static str) -> Result<String, ClientError> {
    match optional_header(headers, name) {
        Some(value) => Ok(value),
        None => Err(ClientError::NextInvocationMissingHeader(name)),
    }
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    let value = String::from_utf8_lossy(value.as_bytes());
    if value.is_empty() {
        None
    } else {
        Some(value.into_owned())
    }
}

/// One event delivered by the control plane: its metadata and the raw event
/// payload, which may be empty.
#[derive(Debug)]
pub struct Invocation {
    /// The invocation metadata parsed from the response headers.
    pub metadata: InvocationMetadata,
    /// The raw event bytes.
    pub event: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with_required() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_static("my-id"));
        headers.insert(HEADER_DEADLINE_MS, HeaderValue::from_static("1542409706888"));
        headers.insert(
            HEADER_FUNCTION_ARN,
            HeaderValue::from_static("arn:aws:lambda:us-east-2:123456789012:function:custom-runtime"),
        );
        headers
    }

    #[test]
    fn parses_all_headers() {
        let mut headers = headers_with_required();
        headers.insert(
            HEADER_TRACE_ID,
            HeaderValue::from_static("Root=1-5bef4de7-ad49b0e87f6ef6c87fc2e700;Sampled=1"),
        );
        headers.insert(HEADER_CLIENT_CONTEXT, HeaderValue::from_static("{}"));
        headers.insert(HEADER_TENANT_ID, HeaderValue::from_static("tenant-a"));

        let metadata = InvocationMetadata::from_headers(&headers).unwrap();
        assert_eq!(metadata.request_id, "my-id");
        assert_eq!(metadata.deadline_ms, 1_542_409_706_888);
        assert!(metadata.invoked_function_arn.ends_with("custom-runtime"));
        assert!(metadata.trace_id.starts_with("Root=1-5bef4de7"));
        assert_eq!(metadata.client_context.as_deref(), Some("{}"));
        assert_eq!(metadata.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(metadata.cognito_identity, None);
    }

    #[test]
    fn synthesizes_trace_id_when_absent() {
        let metadata = InvocationMetadata::from_headers(&headers_with_required()).unwrap();
        let trace_id = metadata.trace_id;
        assert!(trace_id.starts_with("Root=1-"), "unexpected trace id: {trace_id}");
        assert!(trace_id.ends_with(";Sampled=0"));
    }

    #[test]
    fn missing_request_id_is_an_error() {
        let mut headers = headers_with_required();
        headers.remove(HEADER_REQUEST_ID);
        let err = InvocationMetadata::from_headers(&headers).unwrap_err();
        assert!(matches!(
            err,
            ClientError::NextInvocationMissingHeader(HEADER_REQUEST_ID)
        ));
    }

    #[test]
    fn missing_deadline_is_an_error() {
        let mut headers = headers_with_required();
        headers.remove(HEADER_DEADLINE_MS);
        let err = InvocationMetadata::from_headers(&headers).unwrap_err();
        assert!(matches!(
            err,
            ClientError::NextInvocationMissingHeader(HEADER_DEADLINE_MS)
        ));
    }

    #[test]
    fn missing_function_arn_is_an_error() {
        let mut headers = headers_with_required();
        headers.remove(HEADER_FUNCTION_ARN);
        let err = InvocationMetadata::from_headers(&headers).unwrap_err();
        assert!(matches!(
            err,
            ClientError::NextInvocationMissingHeader(HEADER_FUNCTION_ARN)
        ));
    }

    #[test]
    fn empty_request_id_is_an_error() {
        let mut headers = headers_with_required();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_static(""));
        let err = InvocationMetadata::from_headers(&headers).unwrap_err();
        assert!(matches!(err, ClientError::NextInvocationMissingHeader(_)));
    }

    #[test]
    fn malformed_deadline_is_an_error() {
        let mut headers = headers_with_required();
        headers.insert(HEADER_DEADLINE_MS, HeaderValue::from_static("not-a-number"));
        let err = InvocationMetadata::from_headers(&headers).unwrap_err();
        assert!(matches!(err, ClientError::InvocationMissingMetadata));
    }
}
