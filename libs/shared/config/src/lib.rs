use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Backing store for appointment data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Supabase,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            "supabase" | "postgrest" => Ok(StoreBackend::Supabase),
            other => Err(format!("unknown appointment store backend: {}", other)),
        }
    }
}

/// Longest span a generated series may cover, about ten years.
pub const MAX_RECURRENCE_HORIZON_DAYS: i64 = 3660;

/// Clinic-level switches consumed by the scheduling validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicSettings {
    pub concurrent_appointments_for_doctor_allowed: bool,
    pub appointments_can_start_in_the_past: bool,
    pub work_on_sunday_enabled: bool,
    pub enable_appointment_state_log: bool,
    pub pre_registration_enabled: bool,
    pub notifications_for_periodic_appointments_enabled: bool,
    pub recurrence_horizon_days: i64,
}

impl Default for ClinicSettings {
    fn default() -> Self {
        Self {
            concurrent_appointments_for_doctor_allowed: false,
            appointments_can_start_in_the_past: false,
            work_on_sunday_enabled: false,
            enable_appointment_state_log: false,
            pre_registration_enabled: false,
            notifications_for_periodic_appointments_enabled: false,
            recurrence_horizon_days: 365,
        }
    }
}

impl ClinicSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            concurrent_appointments_for_doctor_allowed: env_flag(
                "CLINIC_CONCURRENT_APPOINTMENTS_ALLOWED",
                defaults.concurrent_appointments_for_doctor_allowed,
            ),
            appointments_can_start_in_the_past: env_flag(
                "CLINIC_APPOINTMENTS_CAN_START_IN_THE_PAST",
                defaults.appointments_can_start_in_the_past,
            ),
            work_on_sunday_enabled: env_flag(
                "CLINIC_WORK_ON_SUNDAY",
                defaults.work_on_sunday_enabled,
            ),
            enable_appointment_state_log: env_flag(
                "CLINIC_ENABLE_APPOINTMENT_STATE_LOG",
                defaults.enable_appointment_state_log,
            ),
            pre_registration_enabled: env_flag(
                "CLINIC_PRE_REGISTRATION_ENABLED",
                defaults.pre_registration_enabled,
            ),
            notifications_for_periodic_appointments_enabled: env_flag(
                "CLINIC_PERIODIC_NOTIFICATIONS_ENABLED",
                defaults.notifications_for_periodic_appointments_enabled,
            ),
            recurrence_horizon_days: clamp_horizon(env_var_or(
                "CLINIC_RECURRENCE_HORIZON_DAYS",
                defaults.recurrence_horizon_days,
            )),
        }
    }

    /// The recurrence horizon, bounded to `0..=MAX_RECURRENCE_HORIZON_DAYS`.
    pub fn recurrence_horizon(&self) -> i64 {
        self.recurrence_horizon_days.clamp(0, MAX_RECURRENCE_HORIZON_DAYS)
    }
}

fn clamp_horizon(days: i64) -> i64 {
    if !(0..=MAX_RECURRENCE_HORIZON_DAYS).contains(&days) {
        warn!(
            "CLINIC_RECURRENCE_HORIZON_DAYS={} out of range, clamping to 0..={}",
            days, MAX_RECURRENCE_HORIZON_DAYS
        );
    }
    days.clamp(0, MAX_RECURRENCE_HORIZON_DAYS)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub store_backend: StoreBackend,
    pub bind_addr: String,
    pub clinic_defaults: ClinicSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            store_backend: env_var_or("APPOINTMENT_STORE", StoreBackend::Memory),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| {
                    warn!("BIND_ADDR not set, using default");
                    "0.0.0.0:3000".to_string()
                }),
            clinic_defaults: ClinicSettings::from_env(),
        };

        if config.store_backend == StoreBackend::Supabase && !config.is_configured() {
            warn!("Supabase store selected but SUPABASE_URL / SUPABASE_ANON_PUBLIC_KEY are missing");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_horizon_is_bounded() {
        let mut settings = ClinicSettings::default();
        assert_eq!(settings.recurrence_horizon(), 365);

        settings.recurrence_horizon_days = i64::MAX / 2;
        assert_eq!(settings.recurrence_horizon(), MAX_RECURRENCE_HORIZON_DAYS);

        settings.recurrence_horizon_days = -5;
        assert_eq!(settings.recurrence_horizon(), 0);
        assert_eq!(clamp_horizon(i64::MIN), 0);
    }
}
