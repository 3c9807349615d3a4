use std::sync::Arc;

use arc_swap::ArcSwap;

use quill_llm::DEFAULT_BASE_URL;
use quill_storage::{SettingsRecord, SettingsStore, StorageResult};

/// UI theme preference. Persisted as text; unknown values fall back to dark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("light") {
            Theme::Light
        } else {
            Theme::Dark
        }
    }
}

/// Process-wide settings value. Exactly one logical record exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            theme: Theme::Dark,
        }
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Configured base URL, or the service default when unset.
    pub fn resolved_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

/// Partial update applied by `SettingsState::save`. Unset fields keep
/// their current values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsPatch {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub theme: Option<Theme>,
}

impl SettingsPatch {
    pub fn api_key(value: impl Into<String>) -> Self {
        Self {
            api_key: Some(value.into()),
            ..Self::default()
        }
    }
}

/// Holds the settings singleton: an in-memory snapshot on arc-swap for
/// cheap reads, persisted through the storage singleton row. No
/// validation is applied to the key or URL.
pub struct SettingsState {
    store: Arc<dyn SettingsStore>,
    current: ArcSwap<Settings>,
}

impl SettingsState {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            current: ArcSwap::from_pointee(Settings::default()),
        }
    }

    /// Loads the persisted singleton over the defaults; persisted fields win.
    /// An absent row leaves the pure defaults in place.
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(record) = self.store.load_settings().await? {
            self.current.store(Arc::new(record_to_settings(&record)));
        }

        Ok(())
    }

    pub fn current(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Merges the partial into the current value, persists the merged
    /// whole as the singleton row, then swaps the snapshot.
    pub async fn save(&self, patch: SettingsPatch) -> StorageResult<Arc<Settings>> {
        let mut next = (*self.current.load_full()).clone();
        if let Some(api_key) = patch.api_key {
            next.api_key = api_key;
        }
        if let Some(base_url) = patch.base_url {
            next.base_url = Some(base_url);
        }
        if let Some(theme) = patch.theme {
            next.theme = theme;
        }

        self.store.save_settings(settings_to_record(&next)).await?;

        let next = Arc::new(next);
        self.current.store(next.clone());
        tracing::info!("saved settings singleton");
        Ok(next)
    }
}

fn record_to_settings(record: &SettingsRecord) -> Settings {
    let defaults = Settings::default();
    Settings {
        api_key: record.api_key.clone(),
        base_url: record.base_url.clone(),
        theme: record
            .theme
            .as_deref()
            .map(Theme::parse)
            .unwrap_or(defaults.theme),
    }
}

fn settings_to_record(settings: &Settings) -> SettingsRecord {
    SettingsRecord {
        api_key: settings.api_key.clone(),
        base_url: settings.base_url.clone(),
        theme: Some(settings.theme.as_str().to_string()),
    }
}
