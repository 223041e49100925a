//! Outbound HTTP delivery client.

use std::time::Duration;

use torque_core::{Outcome, Task, TASK_ID_HEADER};

/// Redirects followed before the attempt is classified transient.
const MAX_REDIRECTS: usize = 5;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one outbound delivery attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub outcome: Outcome,
    /// Final status code, when a response was received at all.
    pub status_code: Option<u16>,
    /// Short reason, for anything other than a 200.
    pub error: Option<String>,
}

/// HTTP client workers use to POST task bodies to their hooks.
///
/// Certificates are verified. Redirects are followed up to the cap and the
/// final response classifies the attempt; the per-request deadline comes
/// from the task.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
}

impl DeliveryClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    /// POST the stored body to the stored URL and classify the result.
    pub async fn deliver(&self, task: &Task) -> Delivery {
        let mut request = self
            .http
            .post(&task.url)
            .timeout(task.timeout)
            .header(TASK_ID_HEADER, task.id.to_string());

        for (name, value) in &task.headers {
            request = request.header(name, value);
        }

        match request.body(task.body.clone()).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                Delivery {
                    outcome: Outcome::from_status_code(code),
                    status_code: Some(code),
                    error: (code != 200).then(|| format!("hook returned status {code}")),
                }
            }
            // An unbuildable request (bad URL or header) will not improve
            // with retries.
            Err(e) if e.is_builder() => Delivery {
                outcome: Outcome::Failed,
                status_code: None,
                error: Some(format!("invalid request: {e}")),
            },
            Err(e) => Delivery {
                outcome: Outcome::Retry,
                status_code: None,
                error: Some(transport_reason(&e)),
            },
        }
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_redirect() {
        "too many redirects".to_string()
    } else if e.is_connect() {
        format!("connection error: {e}")
    } else {
        e.to_string()
    }
}
