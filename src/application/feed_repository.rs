// Repository trait for upstream observation feeds
use crate::domain::feed::RawFeed;
use crate::domain::observation::EntityKind;
use async_trait::async_trait;

#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Load the current document of the region or station feed.
    /// One attempt per call; the caller decides what a failure means.
    async fn fetch_feed(&self, kind: EntityKind) -> anyhow::Result<RawFeed>;
}
