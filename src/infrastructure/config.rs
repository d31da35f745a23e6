use crate::domain::delta::DEFAULT_TOLERANCE_MINUTES;
use crate::domain::feed::FeedLayout;
use crate::domain::observation::EntityKind;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub feeds: FeedsSettings,
    pub engine: EngineSettings,
    pub refresh: RefreshSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    File,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedsSettings {
    pub source: FeedSource,
    pub timeout_secs: u64,
    pub regions: FeedSettings,
    pub stations: FeedSettings,
}

impl Default for FeedsSettings {
    fn default() -> Self {
        Self {
            source: FeedSource::File,
            timeout_secs: 30,
            regions: FeedSettings::at("data/qg_regions.geojson"),
            stations: FeedSettings::at("data/qg_stations.geojson"),
        }
    }
}

impl FeedsSettings {
    pub fn feed(&self, kind: EntityKind) -> &FeedSettings {
        match kind {
            EntityKind::Region => &self.regions,
            EntityKind::Station => &self.stations,
        }
    }
}

/// Where a feed lives and, optionally, how its properties are named.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FeedSettings {
    /// File path or URL, depending on the feed source
    pub location: String,
    pub id_field: Option<String>,
    pub history_field: Option<String>,
    pub timestamp_field: Option<String>,
    pub ignored_fields: Option<Vec<String>>,
}

impl FeedSettings {
    fn at(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Self::default()
        }
    }

    pub fn layout(&self, kind: EntityKind) -> FeedLayout {
        let mut layout = match kind {
            EntityKind::Region => FeedLayout::regions(),
            EntityKind::Station => FeedLayout::stations(),
        };
        if let Some(field) = &self.id_field {
            layout.id_field = field.clone();
        }
        if let Some(field) = &self.history_field {
            layout.history_field = field.clone();
        }
        if let Some(field) = &self.timestamp_field {
            layout.timestamp_field = field.clone();
        }
        if let Some(fields) = &self.ignored_fields {
            layout.ignored_fields = fields.clone();
        }
        layout
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub tolerance_minutes: f64,
    pub default_window_minutes: f64,
    pub default_metric: String,
    pub default_view: EntityKind,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            default_window_minutes: 10.0,
            default_metric: "qg".to_string(),
            default_view: EntityKind::Region,
        }
    }
}

/// What a failed refresh does to the data already being served.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadErrorPolicy {
    /// Keep serving the last good index, flagged stale
    Retain,
    /// Drop the last good index
    Discard,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshSettings {
    /// Polling period; 0 loads once and never polls
    pub interval_secs: u64,
    pub on_load_error: LoadErrorPolicy,
    pub preserve_scrub_position: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            on_load_error: LoadErrorPolicy::Retain,
            preserve_scrub_position: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `config/overlay.{toml,json,yaml}` when present, then `OVERLAY__*` env vars.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/overlay").required(false))
        .add_source(
            config::Environment::with_prefix("OVERLAY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
