// Overlay controller - Refresh scheduling and selection state
use crate::application::feed_repository::FeedRepository;
use crate::domain::delta::Delta;
use crate::domain::feed::RawFeed;
use crate::domain::history::{HistoryIndexer, IndexStats};
use crate::domain::observation::EntityKind;
use crate::domain::overlay::{OverlayIndex, OverlayView, Selection, Snapshot};
use crate::infrastructure::config::{EngineSettings, FeedsSettings, LoadErrorPolicy, RefreshSettings};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to load {kind} feed: {message}")]
    Feed { kind: EntityKind, message: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("window must be a non-negative number of minutes, got {0}")]
    InvalidWindow(f64),
    #[error("metric name must not be empty")]
    EmptyMetric,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Event sources that cause the overlay to be recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Periodic refresh: reload both feeds, then recompute
    Timer,
    Scrub(usize),
    SelectTimestamp(String),
    ViewChanged(EntityKind),
    MetricChanged(String),
    WindowChanged(f64),
    /// Several fields at once, applied all together or not at all
    Select(SelectionChange),
}

impl Trigger {
    fn selection_change(&self) -> Option<SelectionChange> {
        let change = match self {
            Trigger::Timer => return None,
            Trigger::Scrub(position) => SelectionChange {
                index: Some(*position),
                ..SelectionChange::default()
            },
            Trigger::SelectTimestamp(timestamp) => SelectionChange {
                timestamp: Some(timestamp.clone()),
                ..SelectionChange::default()
            },
            Trigger::ViewChanged(kind) => SelectionChange {
                view: Some(*kind),
                ..SelectionChange::default()
            },
            Trigger::MetricChanged(metric) => SelectionChange {
                metric: Some(metric.clone()),
                ..SelectionChange::default()
            },
            Trigger::WindowChanged(minutes) => SelectionChange {
                window_minutes: Some(*minutes),
                ..SelectionChange::default()
            },
            Trigger::Select(change) => change.clone(),
        };
        Some(change)
    }
}

/// Requested selection fields; absent ones are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelectionChange {
    pub index: Option<usize>,
    pub timestamp: Option<String>,
    pub view: Option<EntityKind>,
    pub metric: Option<String>,
    pub window_minutes: Option<f64>,
}

impl SelectionChange {
    /// Reject the whole change if any field is invalid. Trims the metric name.
    pub fn validate(mut self) -> Result<Self, SelectionError> {
        if let Some(metric) = self.metric.as_mut() {
            let trimmed = metric.trim();
            if trimmed.is_empty() {
                return Err(SelectionError::EmptyMetric);
            }
            *metric = trimmed.to_string();
        }
        if let Some(minutes) = self.window_minutes {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(SelectionError::InvalidWindow(minutes));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// No refresh has completed yet
    Loading,
    Ready,
    /// The last refresh succeeded but produced no timestamps
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Applied { sequence: u64, timeline_len: usize },
    /// A newer refresh was applied first; this result was dropped
    Superseded { sequence: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: LoadState,
    /// Serving data from an earlier refresh after a failure
    pub stale: bool,
    pub refreshed_at: Option<String>,
    pub last_error: Option<String>,
    pub timeline_len: usize,
    pub sequence: u64,
    pub selection: Selection,
    pub regions: IndexStats,
    pub stations: IndexStats,
}

struct ControllerState {
    index: Arc<OverlayIndex>,
    load: LoadState,
    applied_sequence: u64,
    data_sequence: Option<u64>,
    refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    selection: Selection,
}

pub struct OverlayController {
    repository: Arc<dyn FeedRepository>,
    region_indexer: HistoryIndexer,
    station_indexer: HistoryIndexer,
    engine: EngineSettings,
    refresh: RefreshSettings,
    state: RwLock<ControllerState>,
    sequence: AtomicU64,
    updates: watch::Sender<Arc<OverlayView>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl OverlayController {
    pub fn new(
        repository: Arc<dyn FeedRepository>,
        feeds: &FeedsSettings,
        engine: EngineSettings,
        refresh: RefreshSettings,
    ) -> Self {
        let index = Arc::new(OverlayIndex::empty(engine.tolerance_minutes));
        let selection = Selection {
            index: None,
            view: engine.default_view,
            metric: engine.default_metric.clone(),
            window_minutes: engine.default_window_minutes,
        };
        let (updates, _) = watch::channel(Arc::new(index.render(&selection, 0)));

        Self {
            repository,
            region_indexer: HistoryIndexer::new(
                EntityKind::Region,
                feeds.regions.layout(EntityKind::Region),
            ),
            station_indexer: HistoryIndexer::new(
                EntityKind::Station,
                feeds.stations.layout(EntityKind::Station),
            ),
            engine,
            refresh,
            state: RwLock::new(ControllerState {
                index,
                load: LoadState::Loading,
                applied_sequence: 0,
                data_sequence: None,
                refreshed_at: None,
                last_error: None,
                selection,
            }),
            sequence: AtomicU64::new(0),
            updates,
            poller: Mutex::new(None),
        }
    }

    /// Start polling. The first refresh runs immediately.
    pub fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let controller: Weak<Self> = Arc::downgrade(self);
        let period = (self.refresh.interval_secs > 0)
            .then(|| Duration::from_secs(self.refresh.interval_secs));

        *poller = Some(tokio::spawn(async move {
            let Some(period) = period else {
                tracing::info!("Automatic refresh disabled, loading once");
                if let Some(controller) = controller.upgrade() {
                    controller.run_timer().await;
                }
                return;
            };

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.run_timer().await;
            }
        }));
    }

    pub fn stop(&self) {
        let handle = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Stopped feed polling");
        }
    }

    pub fn is_running(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn run_timer(&self) {
        if let Err(e) = self.recompute(Trigger::Timer).await {
            tracing::warn!("Scheduled refresh failed: {}", e);
        }
    }

    /// Apply one event and publish the recomputed overlay.
    pub async fn recompute(&self, trigger: Trigger) -> Result<Arc<OverlayView>, ControllerError> {
        let refresh_error = match &trigger {
            Trigger::Timer => self.refresh().await.err(),
            _ => {
                self.apply_selection(&trigger).await?;
                None
            }
        };

        let view = self.publish().await;
        match refresh_error {
            Some(e) => Err(e.into()),
            None => Ok(view),
        }
    }

    async fn apply_selection(&self, trigger: &Trigger) -> Result<(), SelectionError> {
        let Some(change) = trigger.selection_change() else {
            return Ok(());
        };
        let change = change.validate()?;

        let mut state = self.state.write().await;
        if let Some(kind) = change.view {
            state.selection.view = kind;
        }
        if let Some(metric) = change.metric {
            state.selection.metric = metric;
        }
        if let Some(minutes) = change.window_minutes {
            state.selection.window_minutes = minutes;
        }
        if let Some(timestamp) = &change.timestamp {
            match state.index.timeline().position(timestamp) {
                Some(position) => state.selection.index = Some(position),
                None => tracing::debug!("Ignoring selection of unknown timestamp {}", timestamp),
            }
        }
        if let Some(position) = change.index {
            let timeline_len = state.index.timeline().len();
            state.selection.index = timeline_len.checked_sub(1).map(|last| position.min(last));
        }

        Ok(())
    }

    /// Reload both feeds and replace the index, unless a newer refresh got there first.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let loaded = self.load().await;

        let mut state = self.state.write().await;
        if sequence <= state.applied_sequence {
            tracing::warn!(
                "Dropping refresh #{}: #{} was already applied",
                sequence,
                state.applied_sequence
            );
            return Ok(RefreshOutcome::Superseded { sequence });
        }
        state.applied_sequence = sequence;

        match loaded {
            Ok(index) => {
                let previous = state
                    .selection
                    .index
                    .and_then(|idx| state.index.timeline().get(idx))
                    .map(|entry| entry.timestamp.clone());
                let preserved = previous
                    .filter(|_| self.refresh.preserve_scrub_position)
                    .and_then(|ts| index.timeline().position(&ts));

                let timeline_len = index.timeline().len();
                state.selection.index = preserved.or_else(|| index.timeline().latest_index());
                state.index = Arc::new(index);
                state.data_sequence = Some(sequence);
                state.load = if timeline_len == 0 { LoadState::Empty } else { LoadState::Ready };
                state.refreshed_at = Some(Utc::now());
                state.last_error = None;

                tracing::info!(
                    "Refresh #{} applied: {} timestamps, {} regions, {} stations",
                    sequence,
                    timeline_len,
                    state.index.entities(EntityKind::Region).len(),
                    state.index.entities(EntityKind::Station).len()
                );
                Ok(RefreshOutcome::Applied {
                    sequence,
                    timeline_len,
                })
            }
            Err(e) => {
                tracing::warn!("Refresh #{} failed: {}", sequence, e);
                state.load = LoadState::Failed;
                state.last_error = Some(e.to_string());
                if self.refresh.on_load_error == LoadErrorPolicy::Discard {
                    state.index = Arc::new(OverlayIndex::empty(self.engine.tolerance_minutes));
                    state.data_sequence = None;
                    state.selection.index = None;
                }
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<OverlayIndex, RefreshError> {
        let (regions, stations) = tokio::try_join!(
            self.fetch(EntityKind::Region),
            self.fetch(EntityKind::Station)
        )?;

        let regions = self.region_indexer.index(&regions);
        let stations = self.station_indexer.index(&stations);
        for (kind, stats) in [(EntityKind::Region, &regions.stats), (EntityKind::Station, &stations.stats)] {
            if stats.skipped_features > 0 || stats.skipped_observations > 0 {
                tracing::debug!(
                    "{} feed: skipped {} features and {} observations",
                    kind,
                    stats.skipped_features,
                    stats.skipped_observations
                );
            }
        }

        Ok(OverlayIndex::build(regions, stations, self.engine.tolerance_minutes))
    }

    async fn fetch(&self, kind: EntityKind) -> Result<RawFeed, RefreshError> {
        self.repository
            .fetch_feed(kind)
            .await
            .map_err(|e| RefreshError::Feed {
                kind,
                message: format!("{:#}", e),
            })
    }

    pub async fn current_view(&self) -> Arc<OverlayView> {
        let state = self.state.read().await;
        let sequence = state.data_sequence.unwrap_or_default();
        Arc::new(state.index.render(&state.selection, sequence))
    }

    /// Render the current selection and push it to subscribers.
    pub async fn publish(&self) -> Arc<OverlayView> {
        let view = self.current_view().await;
        self.updates.send_replace(view.clone());
        view
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<OverlayView>> {
        self.updates.subscribe()
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.state.read().await;
        ControllerStatus {
            state: state.load,
            stale: state.load == LoadState::Failed && state.data_sequence.is_some(),
            refreshed_at: state
                .refreshed_at
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            last_error: state.last_error.clone(),
            timeline_len: state.index.timeline().len(),
            sequence: state.applied_sequence,
            selection: state.selection.clone(),
            regions: state.index.stats(EntityKind::Region).clone(),
            stations: state.index.stats(EntityKind::Station).clone(),
        }
    }

    pub async fn selection(&self) -> Selection {
        self.state.read().await.selection.clone()
    }

    /// Index and selection read together, so the selected position is valid for that index.
    pub async fn selected(&self) -> (Arc<OverlayIndex>, Selection) {
        let state = self.state.read().await;
        (state.index.clone(), state.selection.clone())
    }

    /// The index being served; cheap to clone and safe to read while a refresh runs.
    pub async fn index(&self) -> Arc<OverlayIndex> {
        self.state.read().await.index.clone()
    }

    pub async fn timeline(&self) -> Vec<String> {
        let index = self.index().await;
        index.timeline().timestamps().map(str::to_string).collect()
    }

    pub async fn snapshot(&self, kind: EntityKind, timestamp: &str) -> Snapshot {
        self.index().await.snapshot(kind, timestamp)
    }

    pub async fn delta(
        &self,
        kind: EntityKind,
        key: &str,
        metric: &str,
        timestamp: &str,
        window_minutes: f64,
    ) -> Delta {
        self.index()
            .await
            .delta(kind, key, metric, timestamp, window_minutes)
    }
}

impl Drop for OverlayController {
    fn drop(&mut self) {
        self.stop();
    }
}
