use reqwest::StatusCode;
use std::time::Duration;

pub(crate) const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(2);

/// Client errors other than rate limiting will fail the same way again.
pub(crate) fn is_retryable(err: &anyhow::Error) -> bool {
    let status = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .and_then(|http| http.status());
    match status {
        Some(StatusCode::TOO_MANY_REQUESTS) => true,
        Some(status) => !status.is_client_error(),
        None => true,
    }
}

/// Doubles after every failed attempt.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Awaits `$operation` up to `MAX_ATTEMPTS` times, backing off between transient failures.
macro_rules! retry_request {
    ($context:expr, $operation:expr) => {{
        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err)
                    if attempt >= $crate::retry::MAX_ATTEMPTS
                        || !$crate::retry::is_retryable(&err) =>
                {
                    break Err(err)
                }
                Err(err) => {
                    let delay = $crate::retry::backoff_delay(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {:#}. Retrying in {:?}.",
                        attempt,
                        $crate::retry::MAX_ATTEMPTS,
                        context_value,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_request;
