use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use lambda_streaming_runtime::{
    run, Context, Error, ResponsePrelude, ResponseWriter, StreamingHandler,
};

struct Ticker;

impl StreamingHandler for Ticker {
    async fn handle(
        &mut self,
        _event: Bytes,
        mut writer: ResponseWriter<'_>,
        _context: Context,
    ) -> Result<(), Error> {
        let prelude = ResponsePrelude::with_status(StatusCode::OK)
            .header("content-type", "text/plain; charset=utf-8");
        writer.write_status_and_headers(prelude).await?;

        for n in 1..=5 {
            writer.write(format!("tick {n}\n")).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        writer.finish().await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_streaming_runtime::tracing::init_default_subscriber();
    run(Ticker).await
}
