use forgectl_common::errors::*;
use forgectl_common::http::Client;
use std::time::Duration;
use tokio::time;

pub const MAX_ATTEMPTS: u32 = 3;

pub async fn get_once(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

/// GET with bounded retries: transient failures back off 2-4 s, server-side
/// 5xx responses 3-6 s. Anything else fails immediately.
pub async fn get_with_retry(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    accept: Option<&str>,
) -> Result<Vec<u8>> {
    let mut last_err = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let mut request = client.get(url);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.bytes().await?.to_vec());
                }
                if status.is_server_error() && attempt < MAX_ATTEMPTS {
                    debug!(
                        "Server error {} from {}, retrying (attempt {}/{})",
                        status, url, attempt, MAX_ATTEMPTS
                    );
                    time::sleep(Duration::from_secs(u64::from(attempt) * 3)).await;
                    last_err = Some(anyhow!("{} returned status {}", url, status));
                    continue;
                }
                bail!("{} returned status {}", url, status);
            }
            Err(err) => {
                last_err = Some(Error::from(err));
                if attempt < MAX_ATTEMPTS {
                    debug!(
                        "Request to {} failed, retrying (attempt {}/{})",
                        url, attempt, MAX_ATTEMPTS
                    );
                    time::sleep(Duration::from_secs(u64::from(attempt) * 2)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("Request to {} failed", url)))
}
