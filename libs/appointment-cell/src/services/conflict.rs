use chrono::{DateTime, Datelike, Utc, Weekday};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::ClinicSettings;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentField, ConflictCheckResponse, ValidationErrors};
use crate::services::store::AppointmentStore;

pub const ALREADY_BOOKED: &str = "is already booked for this doctor";
pub const END_BEFORE_START: &str = "must be after the start time";
pub const START_IN_THE_PAST: &str = "cannot be in the past";
pub const DISABLED_WEEKDAY: &str = "falls on a day the clinic does not work";
pub const BOTH_VALIDATION_FLAGS: &str = "cannot be set while the patient is marked as validated";

/// Half-open containment used for double-booking: the candidate conflicts
/// when it starts inside an existing `[start, end)` window.
pub fn starts_within(
    existing_start: DateTime<Utc>,
    existing_end: DateTime<Utc>,
    candidate_start: DateTime<Utc>,
) -> bool {
    existing_start <= candidate_start && candidate_start < existing_end
}

pub fn is_disabled_weekday(weekday: Weekday, settings: &ClinicSettings) -> bool {
    weekday == Weekday::Sun && !settings.work_on_sunday_enabled
}

pub struct ConflictDetectionService {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// Active bookings of the doctor that a booking starting at `start_time`
    /// would collide with.
    pub async fn check_conflicts(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!("Checking conflicts for doctor {} at {}", doctor_id, start_time);

        let conflicting_appointments: Vec<Appointment> = self
            .store
            .doctor_appointments_at(clinic_id, doctor_id, start_time, exclude_appointment_id)
            .await?
            .into_iter()
            .filter(|existing| starts_within(existing.start_time, existing.end_time, start_time))
            .collect();

        let has_conflict = !conflicting_appointments.is_empty();
        if has_conflict {
            warn!(
                "Conflict detected for doctor {} - {} conflicting appointments",
                doctor_id,
                conflicting_appointments.len()
            );
        }

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
        })
    }

    /// Whether the doctor can take a booking at `start_time` under the
    /// clinic's concurrency setting.
    pub async fn doctor_is_free(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        settings: &ClinicSettings,
    ) -> Result<bool, AppointmentError> {
        if settings.concurrent_appointments_for_doctor_allowed {
            return Ok(true);
        }

        let response = self
            .check_conflicts(clinic_id, doctor_id, start_time, exclude_appointment_id)
            .await?;
        Ok(!response.has_conflict)
    }

    /// Run every field-level check against a candidate and collect the
    /// failures. A persisted candidate is excluded from its own conflict check.
    pub async fn validate_candidate(
        &self,
        candidate: &Appointment,
        persisted: bool,
        settings: &ClinicSettings,
        now: DateTime<Utc>,
    ) -> Result<ValidationErrors, AppointmentError> {
        let mut errors = validate_schedule_fields(candidate, settings, now);

        let exclude = persisted.then_some(candidate.id);
        let free = self
            .doctor_is_free(
                candidate.clinic_id,
                candidate.doctor_id,
                candidate.start_time,
                exclude,
                settings,
            )
            .await?;
        if !free {
            errors.add(AppointmentField::StartTime, ALREADY_BOOKED);
        }

        Ok(errors)
    }
}

/// Checks that hold for every saved appointment, whatever changed.
pub fn validate_invariant_fields(candidate: &Appointment) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if candidate.end_time <= candidate.start_time {
        errors.add(AppointmentField::EndTime, END_BEFORE_START);
    }

    if candidate.patient_validated && candidate.patient_validate_failed {
        errors.add(AppointmentField::PatientValidateFailed, BOTH_VALIDATION_FLAGS);
    }

    errors
}

/// Checks that need nothing but the candidate and the clinic settings.
pub fn validate_schedule_fields(
    candidate: &Appointment,
    settings: &ClinicSettings,
    now: DateTime<Utc>,
) -> ValidationErrors {
    let mut errors = validate_invariant_fields(candidate);

    if !settings.appointments_can_start_in_the_past && candidate.start_time < now {
        errors.add(AppointmentField::StartTime, START_IN_THE_PAST);
    }

    if is_disabled_weekday(candidate.start_time.weekday(), settings) {
        errors.add(AppointmentField::StartTime, DISABLED_WEEKDAY);
    }

    errors
}
