use bytes::Bytes;
use lambda_streaming_runtime::{run, Context, Error, ResponseWriter, StreamingHandler};

struct Echo;

impl StreamingHandler for Echo {
    async fn handle(
        &mut self,
        event: Bytes,
        mut writer: ResponseWriter<'_>,
        context: Context,
    ) -> Result<(), Error> {
        tracing::info!(remaining_ms = context.remaining_time(), "echoing event");
        writer.write_and_finish(event).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_streaming_runtime::tracing::init_default_subscriber();
    run(Echo).await
}
