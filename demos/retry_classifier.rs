use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use stedy::prelude::{Backoff, Context, RetryClassifier, RetryDecision, RetryPolicy};

/// Retries `409 Conflict` with a fixed pause, e.g. for optimistic-locking APIs.
struct RetryOnConflict;

impl RetryClassifier for RetryOnConflict {
    fn should_retry(&self, decision: &RetryDecision<'_>, _context: &Context) -> bool {
        decision.outcome.status() == Some(StatusCode::CONFLICT)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let policy = RetryPolicy::custom(
        Arc::new(RetryOnConflict),
        Backoff::Constant(Duration::from_millis(200)),
    )
    .max_retries(3)?;

    let result = stedy::put(&policy, "https://postman-echo.com/status/409", "{}")
        .send()
        .await
        .map(|response| response.status().as_u16());
    println!("result={result:?}");
    Ok(())
}
