// HTTP feed repository - one GET per feed per refresh
use crate::application::feed_repository::FeedRepository;
use crate::domain::feed::RawFeed;
use crate::domain::observation::EntityKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpFeedRepository {
    client: reqwest::Client,
    regions_url: String,
    stations_url: String,
}

impl HttpFeedRepository {
    pub fn new(regions_url: String, stations_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            regions_url,
            stations_url,
        })
    }

    fn url(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Region => &self.regions_url,
            EntityKind::Station => &self.stations_url,
        }
    }
}

#[async_trait]
impl FeedRepository for HttpFeedRepository {
    async fn fetch_feed(&self, kind: EntityKind) -> Result<RawFeed> {
        let url = self.url(kind);
        tracing::debug!("Fetching {} feed from {}", kind, url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/geo+json, application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} feed request failed with status {}: {}", kind, status, body);
        }

        response
            .json::<RawFeed>()
            .await
            .with_context(|| format!("Failed to parse {} feed from {}", kind, url))
    }
}
