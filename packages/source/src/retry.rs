//! Bounded retry for ACLED requests.
//!
//! Every upstream call goes through [`send_json`] or [`send_text`]. Only
//! after retries run out does the error reach the recency cache, which
//! then falls back to the last good snapshot.

use std::time::Duration;

use crate::SourceError;

/// Attempts after the first for transient failures. Backoff doubles from
/// 2s, so a request gives up after about a minute.
const MAX_RETRIES: u32 = 5;

/// Re-fetches allowed when a 2xx body isn't valid JSON (ACLED occasionally
/// truncates large pages).
const MAX_BODY_RETRIES: u32 = 2;

/// Characters of an undecodable body kept for the log.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends a request and decodes the body as JSON.
///
/// `build_request` is called on every attempt because builders are
/// consumed by `send()`. Transport errors, 429 and 5xx are retried with
/// backoff; a body that fails to decode is re-fetched up to
/// [`MAX_BODY_RETRIES`] times. 401/403 become [`SourceError::Auth`].
///
/// # Errors
///
/// Returns [`SourceError`] once retries are exhausted or on a permanent
/// failure.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;
    loop {
        let response = send_inner(&build_request, MAX_RETRIES).await?;
        let url = response.url().clone();
        let text = response.text().await?;
        match serde_json::from_str(&text) {
            Ok(value) => return Ok(value),
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
                log::warn!(
                    "Undecodable body from {url} ({} bytes, {e}); re-fetch {body_attempt}/{MAX_BODY_RETRIES}. Preview: {preview}",
                    text.len()
                );
                tokio::time::sleep(Duration::from_secs(1u64 << body_attempt)).await;
            }
            Err(e) => {
                log::error!("Body from {url} still undecodable after {MAX_BODY_RETRIES} re-fetches");
                return Err(SourceError::Json(e));
            }
        }
    }
}

/// Sends a request and returns the body as text (CAST pages are CSV).
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries.
#[allow(clippy::future_not_send)]
pub async fn send_text<F>(build_request: F) -> Result<String, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, MAX_RETRIES).await?;
    Ok(response.text().await?)
}

/// Retries transport errors and retryable statuses; returns the first
/// 2xx/3xx response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }
        let exhausted = attempt >= max_retries;
        attempt += 1;

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) if is_transient(&e) && !exhausted => {
                log::warn!("  transient error: {e}");
                continue;
            }
            Err(e) => return Err(SourceError::Http(e)),
        };

        match classify(response.status()) {
            StatusClass::Ok => return Ok(response),
            StatusClass::Retry if !exhausted => {
                log::warn!("  HTTP {} (retryable)", response.status());
            }
            StatusClass::Retry => {
                return Err(SourceError::Upstream {
                    message: format!("HTTP {} after {max_retries} retries", response.status()),
                });
            }
            StatusClass::Auth => {
                return Err(SourceError::Auth {
                    message: format!("HTTP {} from {}", response.status(), response.url()),
                });
            }
            StatusClass::Permanent => {
                return Err(SourceError::Upstream {
                    message: format!("HTTP {} from {}", response.status(), response.url()),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Ok,
    Retry,
    Auth,
    Permanent,
}

fn classify(status: reqwest::StatusCode) -> StatusClass {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Retry
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        StatusClass::Auth
    } else if status.is_client_error() {
        StatusClass::Permanent
    } else {
        StatusClass::Ok
    }
}

/// Transport failures worth another attempt.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(classify(StatusCode::OK), StatusClass::Ok);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), StatusClass::Retry);
        assert_eq!(classify(StatusCode::BAD_GATEWAY), StatusClass::Retry);
        assert_eq!(classify(StatusCode::UNAUTHORIZED), StatusClass::Auth);
        assert_eq!(classify(StatusCode::FORBIDDEN), StatusClass::Auth);
        assert_eq!(classify(StatusCode::NOT_FOUND), StatusClass::Permanent);
    }
}
