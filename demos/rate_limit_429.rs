use std::sync::Arc;
use std::time::Duration;

use stedy::prelude::{LogLevel, RetryPolicy, TracingLogger};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let policy = RetryPolicy::rate_limit(Duration::from_millis(250)).max_retries(4)?;
    let cancellation = CancellationToken::new();

    let deadline = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            cancellation.cancel();
        })
    };

    let result = stedy::get(&policy, "https://postman-echo.com/status/429")
        .logger(Arc::new(TracingLogger))
        .log_level(LogLevel::Info)
        .cancellation(cancellation)
        .send()
        .await;
    deadline.abort();

    match result {
        Ok(response) => println!("final status={}", response.status()),
        Err(error) => println!("request failed code={} error={error}", error.code()),
    }
    Ok(())
}
