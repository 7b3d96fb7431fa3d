// libs/appointment-cell/src/services/recurrence.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::{ClinicSettings, MAX_RECURRENCE_HORIZON_DAYS};

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentStatus, RecurrenceStep};
use crate::services::conflict::ConflictDetectionService;
use crate::services::store::AppointmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOccurrence {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Instances to generate from a recurring booking, root excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePlan {
    pub root_id: Uuid,
    pub step: RecurrenceStep,
    pub occurrences: Vec<PlannedOccurrence>,
}

impl RecurrencePlan {
    /// Plan every occurrence whose start stays within `horizon_days` of the
    /// root's start. Returns `None` when the booking has no frequency.
    /// The horizon is bounded by `MAX_RECURRENCE_HORIZON_DAYS`, and a date
    /// past chrono's range ends the plan.
    pub fn for_appointment(root: &Appointment, horizon_days: i64) -> Option<Self> {
        let step = root.frequency_time()?;
        let horizon = Duration::try_days(horizon_days.clamp(0, MAX_RECURRENCE_HORIZON_DAYS))
            .and_then(|days| root.start_time.checked_add_signed(days))
            .unwrap_or(root.start_time);
        let duration = root.end_time - root.start_time;

        let mut occurrences = Vec::new();
        let mut n = 1;
        while let Some(start_time) = step.nth_after(root.start_time, n) {
            if start_time > horizon {
                break;
            }
            let Some(end_time) = start_time.checked_add_signed(duration) else {
                break;
            };
            occurrences.push(PlannedOccurrence { start_time, end_time });
            n += 1;
        }

        Some(Self {
            root_id: root.id,
            step,
            occurrences,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Child appointments inheriting the root's scheduling attributes.
    pub fn instances(&self, root: &Appointment) -> Vec<Appointment> {
        let now = Utc::now();
        self.occurrences
            .iter()
            .map(|occurrence| {
                let mut child = Appointment {
                    id: Uuid::new_v4(),
                    start_time: occurrence.start_time,
                    end_time: occurrence.end_time,
                    assisted: false,
                    canceled: false,
                    confirmed: false,
                    recursive: true,
                    patient_validated: false,
                    patient_validate_failed: false,
                    reminder_sent: false,
                    frequency: None,
                    status: AppointmentStatus::JustCreated,
                    parent_id: Some(root.id),
                    series_id: Some(root.id),
                    cancellation_reason: None,
                    created_at: now,
                    updated_at: now,
                    ..root.clone()
                };
                child.normalize_all_day();
                child
            })
            .collect()
    }
}

pub fn conflict_message(start_time: DateTime<Utc>) -> String {
    format!(
        "conflicts with an existing appointment on {}",
        start_time.format("%d/%m/%Y %H:%M")
    )
}

/// Materializes, removes and reschedules the members of a series.
#[async_trait]
pub trait RecurrenceEngine: Send + Sync {
    /// Conflict messages for every planned occurrence, in plan order.
    async fn validate(
        &self,
        root: &Appointment,
        plan: &RecurrencePlan,
        settings: &ClinicSettings,
    ) -> Result<Vec<String>, AppointmentError>;

    async fn materialize(&self, root: &Appointment, plan: &RecurrencePlan) -> Result<usize, AppointmentError>;

    async fn remove(&self, clinic_id: Uuid, series_root: Uuid) -> Result<usize, AppointmentError>;

    /// Shift this and every later member of the series by the same delta as
    /// `previous -> updated`. Nothing is written when conflicts are found.
    async fn update_forward(
        &self,
        previous: &Appointment,
        updated: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<Vec<String>, AppointmentError>;
}

pub struct StoreRecurrenceEngine {
    store: Arc<dyn AppointmentStore>,
    conflicts: Arc<ConflictDetectionService>,
}

impl StoreRecurrenceEngine {
    pub fn new(store: Arc<dyn AppointmentStore>, conflicts: Arc<ConflictDetectionService>) -> Self {
        Self { store, conflicts }
    }

    /// Conflicting bookings at `start_time`, ignoring the given ids.
    async fn has_foreign_conflict(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        ignore: &HashSet<Uuid>,
        settings: &ClinicSettings,
    ) -> Result<bool, AppointmentError> {
        if settings.concurrent_appointments_for_doctor_allowed {
            return Ok(false);
        }

        let response = self
            .conflicts
            .check_conflicts(clinic_id, doctor_id, start_time, None)
            .await?;
        Ok(response
            .conflicting_appointments
            .iter()
            .any(|existing| !ignore.contains(&existing.id)))
    }
}

#[async_trait]
impl RecurrenceEngine for StoreRecurrenceEngine {
    async fn validate(
        &self,
        root: &Appointment,
        plan: &RecurrencePlan,
        settings: &ClinicSettings,
    ) -> Result<Vec<String>, AppointmentError> {
        // An existing series is replaced, so its own members never block the plan.
        let mut ignore: HashSet<Uuid> = [root.id].into_iter().collect();
        if let Some(series_id) = root.series_root() {
            let members = self.store.series_members(root.clinic_id, series_id).await?;
            ignore.extend(members.iter().map(|member| member.id));
        }

        let mut messages = Vec::new();

        for occurrence in &plan.occurrences {
            if self
                .has_foreign_conflict(root.clinic_id, root.doctor_id, occurrence.start_time, &ignore, settings)
                .await?
            {
                messages.push(conflict_message(occurrence.start_time));
            }
        }

        Ok(messages)
    }

    async fn materialize(&self, root: &Appointment, plan: &RecurrencePlan) -> Result<usize, AppointmentError> {
        let instances = plan.instances(root);
        let created = self.store.insert_many(&instances).await?;
        info!("Materialized {} appointments for series {}", created, root.id);
        Ok(created)
    }

    async fn remove(&self, clinic_id: Uuid, series_root: Uuid) -> Result<usize, AppointmentError> {
        let removed = self.store.cancel_series(clinic_id, series_root, series_root).await?;
        info!("Removed {} generated appointments from series {}", removed, series_root);
        Ok(removed)
    }

    async fn update_forward(
        &self,
        previous: &Appointment,
        updated: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<Vec<String>, AppointmentError> {
        let Some(series_id) = previous.series_root() else {
            return Ok(Vec::new());
        };

        let delta = updated.start_time - previous.start_time;
        let duration = updated.end_time - updated.start_time;

        let following: Vec<Appointment> = self
            .store
            .series_members(previous.clinic_id, series_id)
            .await?
            .into_iter()
            .filter(|member| member.id != previous.id && member.start_time >= previous.start_time)
            .collect();

        // Members that move together must not block each other.
        let mut moving: HashSet<Uuid> = following.iter().map(|member| member.id).collect();
        moving.insert(previous.id);

        let mut shifted = Vec::with_capacity(following.len());
        let mut messages = Vec::new();
        for member in following {
            let start_time = member.start_time + delta;
            if self
                .has_foreign_conflict(member.clinic_id, member.doctor_id, start_time, &moving, settings)
                .await?
            {
                messages.push(conflict_message(start_time));
                continue;
            }

            shifted.push(Appointment {
                start_time,
                end_time: start_time + duration,
                reminder_sent: false,
                updated_at: Utc::now(),
                ..member
            });
        }

        if !messages.is_empty() {
            warn!(
                "Series {} update rejected: {} conflicting occurrences",
                series_id,
                messages.len()
            );
            return Ok(messages);
        }

        for member in &shifted {
            self.store.update(member).await?;
        }
        debug!("Shifted {} members of series {} by {}", shifted.len(), series_id, delta);
        Ok(messages)
    }
}

/// Decides when a booking's series is planned, validated, generated, removed
/// or shifted, and delegates the work to the engine.
pub struct RecurrenceCoordinator {
    engine: Arc<dyn RecurrenceEngine>,
}

impl RecurrenceCoordinator {
    pub fn new(engine: Arc<dyn RecurrenceEngine>) -> Self {
        Self { engine }
    }

    /// Periodic-notification clinics remind patients instead of generating series.
    pub fn generates_series(appointment: &Appointment, settings: &ClinicSettings) -> bool {
        appointment.frequency.is_some() && !settings.notifications_for_periodic_appointments_enabled
    }

    /// First conflict of the planned series, if any.
    #[instrument(skip(self, candidate, settings), fields(appointment_id = %candidate.id))]
    pub async fn first_conflict(
        &self,
        candidate: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<Option<String>, AppointmentError> {
        if !Self::generates_series(candidate, settings) {
            return Ok(None);
        }
        let Some(plan) = RecurrencePlan::for_appointment(candidate, settings.recurrence_horizon()) else {
            return Ok(None);
        };

        let messages = self.engine.validate(candidate, &plan, settings).await?;
        Ok(messages.into_iter().next())
    }

    /// Mark `root` as the head of its own series before it is persisted.
    pub fn prepare_root(root: &mut Appointment, settings: &ClinicSettings) {
        if Self::generates_series(root, settings) {
            root.recursive = true;
            root.series_id = Some(root.id);
        }
    }

    pub async fn materialize(
        &self,
        root: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<usize, AppointmentError> {
        if !Self::generates_series(root, settings) {
            return Ok(0);
        }
        match RecurrencePlan::for_appointment(root, settings.recurrence_horizon()) {
            Some(plan) if !plan.is_empty() => self.engine.materialize(root, &plan).await,
            _ => Ok(0),
        }
    }

    pub async fn remove(&self, appointment: &Appointment) -> Result<usize, AppointmentError> {
        match appointment.series_root() {
            Some(series_root) => self.engine.remove(appointment.clinic_id, series_root).await,
            None => Ok(0),
        }
    }

    /// First conflict reported while shifting the rest of the series.
    pub async fn update_forward(
        &self,
        previous: &Appointment,
        updated: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<Option<String>, AppointmentError> {
        if previous.series_root().is_none() {
            return Ok(None);
        }
        let messages = self.engine.update_forward(previous, updated, settings).await?;
        Ok(messages.into_iter().next())
    }
}
