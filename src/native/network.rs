use std::time::Duration;

use reqwest::{Client, Url};

use crate::core::{
    domain::{FailureKind, FailureReason, ItemOutcome, WorkItem},
    error::RunnerError,
    traits::operation::Operation,
};

/// Issues one GET request per item against `url` and drains the body.
#[derive(Clone, Debug)]
pub struct HttpFetch {
    client: Client,
    url: Url,
}

impl HttpFetch {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, RunnerError> {
        let url = Url::parse(url).map_err(|e| RunnerError::InvalidTarget {
            target: url.to_string(),
            msg: e.to_string(),
        })?;
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

fn classify(err: reqwest::Error) -> FailureReason {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    };
    FailureReason::new(kind, err.to_string())
}

#[async_trait::async_trait]
impl Operation for HttpFetch {
    async fn execute(&self, item: WorkItem) -> ItemOutcome {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailureReason::new(
                FailureKind::Status,
                format!("{} returned {}", self.url, status),
            ));
        }

        let body = response.bytes().await.map_err(classify)?;
        tracing::trace!(%item, bytes = body.len(), "Response received");

        Ok(())
    }
}
