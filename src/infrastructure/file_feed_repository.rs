// GeoJSON files on local disk, as written by the exporter scripts
use crate::application::feed_repository::FeedRepository;
use crate::domain::feed::RawFeed;
use crate::domain::observation::EntityKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FileFeedRepository {
    regions: PathBuf,
    stations: PathBuf,
}

impl FileFeedRepository {
    pub fn new(regions: impl Into<PathBuf>, stations: impl Into<PathBuf>) -> Self {
        Self {
            regions: regions.into(),
            stations: stations.into(),
        }
    }

    fn path(&self, kind: EntityKind) -> &PathBuf {
        match kind {
            EntityKind::Region => &self.regions,
            EntityKind::Station => &self.stations,
        }
    }
}

#[async_trait]
impl FeedRepository for FileFeedRepository {
    async fn fetch_feed(&self, kind: EntityKind) -> Result<RawFeed> {
        let path = self.path(kind);
        tracing::debug!("Reading {} feed from {}", kind, path.display());

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {} as GeoJSON", path.display()))
    }
}
