//! End-to-end scenarios through the local emulator: the real client, the
//! real run loop, and plain HTTP on the invoker side.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use tokio::task::JoinHandle;

use lambda_streaming_runtime::local_server::LocalServer;
use lambda_streaming_runtime::{
    Context, Diagnostic, Error, ResponsePrelude, ResponseWriter, Runtime, RuntimeClient,
    StreamingHandler,
};

struct Echo;

impl StreamingHandler for Echo {
    async fn handle(
        &mut self,
        event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        writer.write_and_finish(event).await?;
        Ok(())
    }
}

async fn start_stack<H>(handler: H) -> (SocketAddr, JoinHandle<()>)
where
    H: StreamingHandler + Send + 'static,
{
    let server = LocalServer::bind("127.0.0.1", 0, "/invoke").await.unwrap();
    let addr = server.local_addr();
    let client = RuntimeClient::from_addr(addr);
    let runtime = Runtime::new(client, handler);
    let task = tokio::spawn(async move {
        tokio::select! {
            _ = server.serve() => {}
            _ = runtime.run() => {}
        }
    });
    (addr, task)
}

async fn invoke(addr: SocketAddr, path_and_query: &str, body: impl Into<Bytes>) -> (StatusCode, Bytes) {
    let client = HttpClient::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let uri = format!("http://{addr}{path_and_query}");
    let req = http::Request::post(uri)
        .body(Full::from(body.into()))
        .unwrap();
    let res = client.request(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn echo_round_trip() {
    let (addr, task) = start_stack(Echo).await;

    let (status, body) = invoke(addr, "/invoke", "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");

    task.abort();
}

#[tokio::test]
async fn sequential_invocations_are_served_in_order() {
    let (addr, task) = start_stack(Echo).await;

    for n in 0..3 {
        let payload = format!("event-{n}");
        let (status, body) = invoke(addr, "/invoke", payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], payload.as_bytes());
    }

    task.abort();
}

#[tokio::test]
async fn concurrent_invocations_are_all_answered() {
    let (addr, task) = start_stack(Echo).await;

    let first = tokio::spawn(invoke(addr, "/invoke", "one"));
    let second = tokio::spawn(invoke(addr, "/invoke", "two"));

    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"one");
    let (status, body) = second.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"two");

    task.abort();
}

#[tokio::test]
async fn large_payload_round_trips() {
    let (addr, task) = start_stack(Echo).await;

    let payload = vec![b'x'; 104_448];
    let (status, body) = invoke(addr, "/invoke", payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.len(), payload.len());
    assert_eq!(&body[..], &payload[..]);

    task.abort();
}

struct TenantEcho;

impl StreamingHandler for TenantEcho {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        context: Context,
    ) -> Result<(), Error> {
        let tenant = context.tenant_id.unwrap_or_default();
        writer.write_and_finish(tenant).await?;
        Ok(())
    }
}

#[tokio::test]
async fn tenant_id_reaches_the_context() {
    let (addr, task) = start_stack(TenantEcho).await;

    let (status, body) = invoke(addr, "/invoke?tenant=alice", "hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"alice");

    task.abort();
}

struct DeadlineCheck;

impl StreamingHandler for DeadlineCheck {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        context: Context,
    ) -> Result<(), Error> {
        // the emulator hands out a far-future deadline
        assert!(context.remaining_time() > 0);
        assert!(!context.xray_trace_id.is_empty());
        writer.write_and_finish("checked").await?;
        Ok(())
    }
}

#[tokio::test]
async fn emulator_provides_deadline_and_trace_id() {
    let (addr, task) = start_stack(DeadlineCheck).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"checked");

    task.abort();
}

struct Failing;

impl StreamingHandler for Failing {
    async fn handle(
        &mut self,
        _event: Bytes,
        _writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        Err("E".into())
    }
}

#[tokio::test]
async fn handler_errors_become_500_responses_and_the_loop_continues() {
    let (addr, task) = start_stack(Failing).await;

    let (status, body) = invoke(addr, "/invoke", "boom").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let diagnostic: Diagnostic = serde_json::from_slice(&body).unwrap();
    assert_eq!(diagnostic.error_message, "E");
    assert!(!diagnostic.error_type.is_empty());

    // the run loop survives handler failures
    let (status, _) = invoke(addr, "/invoke", "boom again").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    task.abort();
}

struct Panicking;

impl StreamingHandler for Panicking {
    async fn handle(
        &mut self,
        _event: Bytes,
        _writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        panic!("This is intentionally here")
    }
}

#[tokio::test]
async fn handler_panics_are_reported_not_fatal() {
    let (addr, task) = start_stack(Panicking).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let diagnostic: Diagnostic = serde_json::from_slice(&body).unwrap();
    assert!(diagnostic.error_message.contains("Lambda panicked"));

    let (status, _) = invoke(addr, "/invoke", "y").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    task.abort();
}

struct Streaming;

impl StreamingHandler for Streaming {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        writer.write("h").await?;
        writer.write("e").await?;
        writer.write("llo").await?;
        writer.finish().await?;
        Ok(())
    }
}

#[tokio::test]
async fn streamed_chunks_are_concatenated_for_the_invoker() {
    let (addr, task) = start_stack(Streaming).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"hello");

    task.abort();
}

struct CustomHeaders;

impl StreamingHandler for CustomHeaders {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        let prelude = ResponsePrelude::with_status(StatusCode::OK).header("x", "y");
        writer.write_status_and_headers(prelude).await?;
        writer.write("ok").await?;
        writer.finish().await?;
        Ok(())
    }
}

#[tokio::test]
async fn custom_headers_prelude_is_part_of_the_stream() {
    let (addr, task) = start_stack(CustomHeaders).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::OK);
    // the emulator relays the raw stream: prelude, separator, then the body
    let separator = [0u8; 8];
    let at = body
        .windows(separator.len())
        .position(|window| window == separator)
        .expect("no prelude separator in relayed body");
    let prelude: serde_json::Value = serde_json::from_slice(&body[..at]).unwrap();
    assert_eq!(prelude["statusCode"], 200);
    assert_eq!(&body[at + separator.len()..], b"ok");

    task.abort();
}

struct FailsMidstream;

impl StreamingHandler for FailsMidstream {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        writer.write("partial").await?;
        writer.report_error(Diagnostic::new("MyError", "boom")).await?;
        Ok(())
    }
}

#[tokio::test]
async fn midstream_errors_reach_the_invoker() {
    let (addr, task) = start_stack(FailsMidstream).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let diagnostic: Diagnostic = serde_json::from_slice(&body).unwrap();
    assert_eq!(diagnostic, Diagnostic::new("MyError", "boom"));

    task.abort();
}

struct NeverFinishes;

impl StreamingHandler for NeverFinishes {
    async fn handle(
        &mut self,
        _event: Bytes,
        _writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        Ok(())
    }
}

#[tokio::test]
async fn unfinished_responses_are_reported_as_errors() {
    let (addr, task) = start_stack(NeverFinishes).await;

    let (status, body) = invoke(addr, "/invoke", "x").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let diagnostic: Diagnostic = serde_json::from_slice(&body).unwrap();
    assert!(diagnostic.error_message.contains("without finishing"));

    task.abort();
}

struct Idle;

impl StreamingHandler for Idle {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        writer.finish().await?;
        Ok(())
    }
}

#[tokio::test]
async fn second_concurrent_run_is_rejected() {
    // a control plane that accepts the connection but never answers keeps
    // the first runtime parked in next_invocation
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    std::env::set_var("AWS_LAMBDA_RUNTIME_API", addr.to_string());

    let first = tokio::spawn(lambda_streaming_runtime::run(Idle));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = lambda_streaming_runtime::run(Idle).await.unwrap_err();
    assert!(err.to_string().contains("already running"));

    first.abort();
    let _ = first.await;
    drop(listener);
}
