use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_config::ClinicSettings;

/// Source of the per-clinic switches that guard validation and side effects.
#[async_trait]
pub trait ClinicSettingsProvider: Send + Sync {
    async fn settings(&self, clinic_id: Uuid) -> ClinicSettings;
}

/// Same settings for every clinic, usually loaded from the environment.
pub struct StaticClinicSettings {
    settings: ClinicSettings,
}

impl StaticClinicSettings {
    pub fn new(settings: ClinicSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ClinicSettingsProvider for StaticClinicSettings {
    async fn settings(&self, _clinic_id: Uuid) -> ClinicSettings {
        self.settings.clone()
    }
}

/// Per-clinic overrides on top of shared defaults.
pub struct InMemoryClinicSettings {
    defaults: ClinicSettings,
    overrides: RwLock<HashMap<Uuid, ClinicSettings>>,
}

impl InMemoryClinicSettings {
    pub fn new(defaults: ClinicSettings) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set(&self, clinic_id: Uuid, settings: ClinicSettings) {
        self.overrides.write().await.insert(clinic_id, settings);
    }

    /// Edit a clinic's settings in place, starting from the defaults.
    pub async fn update<F>(&self, clinic_id: Uuid, change: F)
    where
        F: FnOnce(&mut ClinicSettings) + Send,
    {
        let mut overrides = self.overrides.write().await;
        let settings = overrides
            .entry(clinic_id)
            .or_insert_with(|| self.defaults.clone());
        change(settings);
    }
}

impl Default for InMemoryClinicSettings {
    fn default() -> Self {
        Self::new(ClinicSettings::default())
    }
}

#[async_trait]
impl ClinicSettingsProvider for InMemoryClinicSettings {
    async fn settings(&self, clinic_id: Uuid) -> ClinicSettings {
        self.overrides
            .read()
            .await
            .get(&clinic_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}
