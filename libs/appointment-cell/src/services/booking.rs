// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::ClinicSettings;

use crate::error::AppointmentError;
use crate::models::{
    parse_slot_time, Appointment, AppointmentEventLog, AppointmentField, AppointmentQuery,
    AppointmentStatus, BookAppointmentRequest, ConflictCheckResponse, LifecycleEvent,
    UpdateAppointmentRequest, ValidationErrors,
};
use crate::services::billing::{Billable, FinancialRecordLedger, InMemoryFinancialRecordLedger};
use crate::services::conflict::{validate_invariant_fields, ConflictDetectionService};
use crate::services::lifecycle::{self, SideEffect, Transition};
use crate::services::locks::DoctorScheduleLocks;
use crate::services::notification::{
    LoggingNotificationDispatcher, LoggingQueueBroadcaster, Notification, NotificationDispatcher,
    NotificationKind, QueueBroadcast, QueueBroadcaster, Recipient,
};
use crate::services::package::{CascadeOutcome, PackageCascadeService, PackageChange};
use crate::services::recurrence::{RecurrenceCoordinator, RecurrenceEngine, StoreRecurrenceEngine};
use crate::services::settings::ClinicSettingsProvider;
use crate::services::store::AppointmentStore;

pub const REQUIRED: &str = "is required";

/// Result of firing a lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub appointment: Appointment,
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<CascadeOutcome>,
}

/// What an update actually changed, computed once and shared by every
/// side effect decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub start_changed: bool,
    pub end_changed: bool,
    pub doctor_changed: bool,
    pub patient_changed: bool,
    pub frequency_changed: bool,
    pub assisted_changed: bool,
    pub canceled_changed: bool,
    pub patient_validated_set: bool,
    pub patient_validate_failed_set: bool,
    pub uncanceled: bool,
}

impl ChangeSet {
    pub fn between(previous: &Appointment, updated: &Appointment) -> Self {
        Self {
            start_changed: previous.start_time != updated.start_time,
            end_changed: previous.end_time != updated.end_time,
            doctor_changed: previous.doctor_id != updated.doctor_id,
            patient_changed: previous.patient_id != updated.patient_id,
            frequency_changed: previous.frequency != updated.frequency
                || (updated.frequency.is_some() && previous.frequency_number != updated.frequency_number),
            assisted_changed: previous.assisted != updated.assisted,
            canceled_changed: previous.canceled != updated.canceled,
            patient_validated_set: !previous.patient_validated && updated.patient_validated,
            patient_validate_failed_set: !previous.patient_validate_failed && updated.patient_validate_failed,
            uncanceled: previous.canceled && !updated.canceled,
        }
    }

    /// The doctor's calendar is affected.
    pub fn reschedules(&self) -> bool {
        self.start_changed || self.end_changed || self.doctor_changed
    }

    /// The appointment claims a slot it did not hold before: it moved, or it
    /// was brought back from cancellation.
    pub fn occupies_new_slot(&self) -> bool {
        self.reschedules() || self.uncanceled
    }

    /// Changes the patient is told about.
    pub fn notifies_update(&self) -> bool {
        (self.reschedules() || self.patient_changed || self.frequency_changed) && !self.canceled_changed
    }
}

/// Apply the fields present in `request` on top of `previous`.
pub fn apply_update(previous: &Appointment, request: &UpdateAppointmentRequest) -> Appointment {
    let mut updated = previous.clone();

    if let Some(patient_id) = request.patient_id {
        updated.patient_id = patient_id;
    }
    if let Some(doctor_id) = request.doctor_id {
        updated.doctor_id = doctor_id;
    }
    if let Some(appointment_type_id) = request.appointment_type_id {
        updated.appointment_type_id = appointment_type_id;
    }
    if request.referencer_doctor_id.is_some() {
        updated.referencer_doctor_id = request.referencer_doctor_id;
    }

    // Moving the start alone keeps the booked duration.
    match (request.start_time, request.end_time) {
        (Some(start), Some(end)) => {
            updated.start_time = start;
            updated.end_time = end;
        }
        (Some(start), None) => {
            updated.end_time = start + (previous.end_time - previous.start_time);
            updated.start_time = start;
        }
        (None, Some(end)) => updated.end_time = end,
        (None, None) => {}
    }

    if let Some(is_all_day) = request.is_all_day {
        updated.is_all_day = is_all_day;
    }
    if let Some(assisted) = request.assisted {
        updated.assisted = assisted;
    }
    if let Some(canceled) = request.canceled {
        updated.canceled = canceled;
    }
    if request.cancellation_reason.is_some() {
        updated.cancellation_reason = request.cancellation_reason.clone();
    }
    if let Some(frequency) = request.frequency {
        updated.frequency = frequency;
    }
    if let Some(frequency_number) = request.frequency_number {
        updated.frequency_number = frequency_number.max(1);
    }
    if let Some(patient_validated) = request.patient_validated {
        updated.patient_validated = patient_validated;
    }
    if let Some(patient_validate_failed) = request.patient_validate_failed {
        updated.patient_validate_failed = patient_validate_failed;
    }
    if request.description.is_some() {
        updated.description = request.description.clone();
    }

    updated.normalize_all_day();
    updated
}

pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    settings: Arc<dyn ClinicSettingsProvider>,
    conflicts: Arc<ConflictDetectionService>,
    recurrence: RecurrenceCoordinator,
    packages: PackageCascadeService,
    dispatcher: Arc<dyn NotificationDispatcher>,
    broadcaster: Arc<dyn QueueBroadcaster>,
    ledger: Arc<dyn FinancialRecordLedger>,
    locks: Arc<DoctorScheduleLocks>,
}

impl AppointmentBookingService {
    /// Service over `store` with store-backed recurrence and tracing-only
    /// collaborators. Use the `with_*` builders to plug in real ones.
    pub fn new(store: Arc<dyn AppointmentStore>, settings: Arc<dyn ClinicSettingsProvider>) -> Self {
        let conflicts = Arc::new(ConflictDetectionService::new(Arc::clone(&store)));
        let engine = Arc::new(StoreRecurrenceEngine::new(Arc::clone(&store), Arc::clone(&conflicts)));

        Self {
            recurrence: RecurrenceCoordinator::new(engine),
            packages: PackageCascadeService::new(Arc::clone(&store)),
            conflicts,
            store,
            settings,
            dispatcher: Arc::new(LoggingNotificationDispatcher),
            broadcaster: Arc::new(LoggingQueueBroadcaster),
            ledger: Arc::new(InMemoryFinancialRecordLedger::new()),
            locks: Arc::new(DoctorScheduleLocks::new()),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn QueueBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn FinancialRecordLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_recurrence_engine(mut self, engine: Arc<dyn RecurrenceEngine>) -> Self {
        self.recurrence = RecurrenceCoordinator::new(engine);
        self
    }

    pub fn with_locks(mut self, locks: Arc<DoctorScheduleLocks>) -> Self {
        self.locks = locks;
        self
    }

    async fn load(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find(clinic_id, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn get_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.load(clinic_id, appointment_id).await
    }

    pub async fn list_appointments(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.list(clinic_id, query).await
    }

    pub async fn event_logs(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentEventLog>, AppointmentError> {
        self.store.event_logs(clinic_id, appointment_id).await
    }

    pub async fn check_conflicts(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        self.conflicts
            .check_conflicts(clinic_id, doctor_id, start_time, exclude_appointment_id)
            .await
    }

    /// Book a new appointment and, when it recurs, generate its series.
    #[instrument(skip_all, fields(clinic_id = %clinic_id))]
    pub async fn book_appointment(
        &self,
        clinic_id: Uuid,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let mut candidate = build_candidate(clinic_id, &request)?;
        info!("Booking appointment for patient {} with doctor {}", candidate.patient_id, candidate.doctor_id);

        if let Some(package_id) = candidate.patient_package_id {
            if self
                .store
                .find_package_with_deleted(clinic_id, package_id)
                .await?
                .is_none()
            {
                return Err(AppointmentError::PackageNotFound);
            }
        }

        let settings = self.settings.settings(clinic_id).await;
        let _schedule = self.locks.acquire(clinic_id, &[candidate.doctor_id]).await;

        let mut errors = self
            .conflicts
            .validate_candidate(&candidate, false, &settings, Utc::now())
            .await?;
        if let Some(message) = self.recurrence.first_conflict(&candidate, &settings).await? {
            errors.add(AppointmentField::StartTime, message);
        }
        if !errors.is_empty() {
            warn!("Booking rejected: {}", errors);
            return Err(errors.into());
        }

        RecurrenceCoordinator::prepare_root(&mut candidate, &settings);
        self.store.insert(&candidate).await?;
        let generated = self.recurrence.materialize(&candidate, &settings).await?;

        info!(
            "Appointment {} booked ({} series members generated)",
            candidate.id, generated
        );

        if candidate.parent_id.is_none() {
            self.notify(NotificationKind::AppointmentCreated, &candidate, Recipient::Patient(candidate.patient_id))
                .await;
        }

        Ok(candidate)
    }

    /// Save an edit, enforcing the lifecycle guards and running the
    /// recurrence, package and notification side effects of what changed.
    #[instrument(skip_all, fields(clinic_id = %clinic_id, appointment_id = %appointment_id))]
    pub async fn update_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let record = self.locks.acquire_appointment(clinic_id, appointment_id).await;
        let previous = self
            .store
            .find_with_canceled(clinic_id, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;
        let settings = self.settings.settings(clinic_id).await;

        let mut updated = apply_update(&previous, &request);
        let changes = ChangeSet::between(&previous, &updated);
        debug!("Update of {}: {:?}", appointment_id, changes);

        if changes.assisted_changed {
            lifecycle::check_assisted_change(&previous, updated.assisted)?;
        }
        if changes.canceled_changed && updated.canceled {
            lifecycle::check_cancel(&previous, &settings)?;
        }

        // assistance moves the status through the state machine
        let assistance = if changes.assisted_changed {
            let event = if updated.assisted {
                LifecycleEvent::Confirm
            } else {
                LifecycleEvent::ResetToCreated
            };
            let transition = lifecycle::transition(&updated, event, &settings)?;
            updated.status = transition.to;
            Some(transition)
        } else {
            None
        };
        if changes.start_changed {
            updated.reminder_sent = false;
        }
        if previous.frequency.is_some() && updated.frequency.is_none() {
            updated.recursive = false;
        }
        updated.updated_at = Utc::now();

        let schedule = self
            .locks
            .acquire(clinic_id, &[previous.doctor_id, updated.doctor_id])
            .await;

        let mut errors = if changes.occupies_new_slot() && !updated.canceled {
            self.conflicts
                .validate_candidate(&updated, true, &settings, Utc::now())
                .await?
        } else {
            validate_invariant_fields(&updated)
        };

        let series_replaced = changes.frequency_changed
            && updated.frequency.is_some()
            && RecurrenceCoordinator::generates_series(&updated, &settings);
        if series_replaced {
            if let Some(message) = self.recurrence.first_conflict(&updated, &settings).await? {
                errors.add(AppointmentField::Frequency, message);
            }
        }
        if !errors.is_empty() {
            warn!("Update of {} rejected: {}", appointment_id, errors);
            return Err(errors.into());
        }

        let shift_series = request.apply_from_now_on
            && changes.reschedules()
            && !changes.frequency_changed
            && previous.series_root().is_some();
        if shift_series {
            if let Some(message) = self.recurrence.update_forward(&previous, &updated, &settings).await? {
                let mut errors = ValidationErrors::new();
                errors.add(AppointmentField::StartTime, message);
                return Err(errors.into());
            }
        }

        if changes.frequency_changed && previous.frequency.is_some() {
            let removed = self.recurrence.remove(&previous).await?;
            debug!("Removed {} members of the previous series", removed);
        }
        if series_replaced {
            RecurrenceCoordinator::prepare_root(&mut updated, &settings);
        }

        self.store.update(&updated).await?;

        if series_replaced {
            self.recurrence.materialize(&updated, &settings).await?;
        }
        drop(schedule);

        if let Some(transition) = &assistance {
            for effect in &transition.effects {
                self.execute(&updated, effect).await?;
            }
        }
        if changes.assisted_changed {
            self.packages
                .propagate(&updated, PackageChange::Assistance(updated.assisted))
                .await?;
        }
        if changes.canceled_changed {
            self.packages
                .propagate(&updated, PackageChange::Canceled(updated.canceled))
                .await?;
        }

        if changes.canceled_changed && updated.canceled {
            self.notify(NotificationKind::AppointmentCanceled, &updated, Recipient::Patient(updated.patient_id))
                .await;
        } else if changes.notifies_update() {
            self.notify(NotificationKind::AppointmentUpdated, &updated, Recipient::Patient(updated.patient_id))
                .await;
        }

        drop(record);
        if changes.patient_validated_set {
            self.fire_event(clinic_id, appointment_id, LifecycleEvent::ValidatePatient)
                .await?;
        }
        if changes.patient_validate_failed_set {
            self.fire_event(clinic_id, appointment_id, LifecycleEvent::ValidatePatientFailed)
                .await?;
        }

        info!("Appointment {} updated", appointment_id);
        Ok(self
            .store
            .find_with_canceled(clinic_id, appointment_id)
            .await?
            .unwrap_or(updated))
    }

    /// Soft-cancel an appointment. With `whole_series` the rest of its
    /// series is canceled as well.
    #[instrument(skip_all, fields(clinic_id = %clinic_id, appointment_id = %appointment_id, whole_series = whole_series))]
    pub async fn cancel_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        reason: Option<String>,
        whole_series: bool,
    ) -> Result<Appointment, AppointmentError> {
        let _record = self.locks.acquire_appointment(clinic_id, appointment_id).await;
        let mut appointment = self.load(clinic_id, appointment_id).await?;
        let settings = self.settings.settings(clinic_id).await;

        lifecycle::check_cancel(&appointment, &settings)?;

        appointment.canceled = true;
        appointment.cancellation_reason = reason;
        appointment.updated_at = Utc::now();
        self.store.update(&appointment).await?;

        self.packages
            .propagate(&appointment, PackageChange::Canceled(true))
            .await?;

        if whole_series {
            self.cancel_rest_of_series(&appointment, &settings).await?;
        }

        info!("Appointment {} canceled", appointment_id);
        self.notify(
            NotificationKind::AppointmentCanceled,
            &appointment,
            Recipient::Patient(appointment.patient_id),
        )
        .await;

        Ok(appointment)
    }

    async fn cancel_rest_of_series(
        &self,
        appointment: &Appointment,
        settings: &ClinicSettings,
    ) -> Result<(), AppointmentError> {
        let Some(series_root) = appointment.series_root() else {
            return Ok(());
        };

        let removed = self.recurrence.remove(appointment).await?;
        debug!("Canceled {} generated members of series {}", removed, series_root);

        if series_root == appointment.id {
            return Ok(());
        }

        // The root is kept by the engine; cancel it too unless it is locked.
        if let Some(mut root) = self.store.find(appointment.clinic_id, series_root).await? {
            match lifecycle::check_cancel(&root, settings) {
                Ok(()) => {
                    root.canceled = true;
                    root.cancellation_reason = appointment.cancellation_reason.clone();
                    root.updated_at = Utc::now();
                    self.store.update(&root).await?;
                }
                Err(error) => warn!("Series root {} left active: {}", series_root, error),
            }
        }
        Ok(())
    }

    /// Fire a lifecycle event and execute the side effects it requests.
    #[instrument(skip_all, fields(clinic_id = %clinic_id, appointment_id = %appointment_id, event = %event))]
    pub async fn fire_event(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        event: LifecycleEvent,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        let _record = self.locks.acquire_appointment(clinic_id, appointment_id).await;
        let mut appointment = self.load(clinic_id, appointment_id).await?;
        let settings = self.settings.settings(clinic_id).await;

        let transition = lifecycle::transition(&appointment, event, &settings)?;
        appointment.status = transition.to;
        appointment.updated_at = Utc::now();
        self.store.update(&appointment).await?;

        info!("Appointment {} moved {} -> {} by {}", appointment_id, transition.from, transition.to, event);

        let mut package = None;
        for effect in &transition.effects {
            if let Some(outcome) = self.execute(&appointment, effect).await? {
                package = Some(outcome);
            }
        }

        Ok(LifecycleOutcome {
            appointment,
            transition,
            package,
        })
    }

    async fn execute(
        &self,
        appointment: &Appointment,
        effect: &SideEffect,
    ) -> Result<Option<CascadeOutcome>, AppointmentError> {
        match effect {
            SideEffect::RecordEventLog { status } => {
                self.store
                    .append_event_log(&AppointmentEventLog::new(appointment.id, *status))
                    .await?;
            }
            SideEffect::HidePatientFromQueue { doctor_id } => {
                self.broadcast(
                    appointment.clinic_id,
                    QueueBroadcast::HidePatient {
                        doctor_id: *doctor_id,
                        appointment_id: appointment.id,
                    },
                )
                .await;
            }
            SideEffect::PickNextPatient { doctor_id } => {
                self.broadcast(appointment.clinic_id, QueueBroadcast::PickNextPatient { doctor_id: *doctor_id })
                    .await;
            }
            SideEffect::NotifyVisitRecordDone => {
                self.notify(NotificationKind::VisitRecordDone, appointment, Recipient::Doctor(appointment.doctor_id))
                    .await;
            }
            SideEffect::CreateFinancialRecordLine => {
                let billable = match self.packages.live_package(appointment).await? {
                    Ok(package) => Billable::PatientPackage(package.id),
                    Err(_) => Billable::AppointmentType(appointment.appointment_type_id),
                };
                let line = self
                    .ledger
                    .record_appointment(
                        appointment.clinic_id,
                        appointment.patient_id,
                        appointment.doctor_id,
                        billable,
                        appointment.id,
                    )
                    .await?;
                debug!("Appointment {} linked to financial line {}", appointment.id, line.id);
            }
            SideEffect::NotifyReferencingDoctor { referencer_doctor_id } => {
                self.notify(
                    NotificationKind::AppointmentCompleted,
                    appointment,
                    Recipient::ReferencingDoctor(*referencer_doctor_id),
                )
                .await;
            }
            SideEffect::BroadcastNewPatient { doctor_id } => {
                self.broadcast(
                    appointment.clinic_id,
                    QueueBroadcast::NewPatient {
                        doctor_id: *doctor_id,
                        appointment_id: appointment.id,
                    },
                )
                .await;
            }
            SideEffect::PropagateBilledToPackage { .. } => {
                let outcome = self.packages.propagate(appointment, PackageChange::Billed).await?;
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    /// Confirmation link from the reminder mail. Only a fresh booking can be
    /// confirmed this way; lifecycle callbacks and the event log do not run.
    pub async fn confirm_by_link(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<bool, AppointmentError> {
        let _record = self.locks.acquire_appointment(clinic_id, appointment_id).await;
        let mut appointment = self.load(clinic_id, appointment_id).await?;
        if appointment.status != AppointmentStatus::JustCreated {
            debug!("Confirmation link ignored for {} in {}", appointment_id, appointment.status);
            return Ok(false);
        }

        appointment.assisted = true;
        appointment.confirmed = true;
        appointment.status = AppointmentStatus::Confirmed;
        appointment.updated_at = Utc::now();
        self.store.update(&appointment).await?;

        info!("Appointment {} confirmed by link", appointment_id);
        Ok(true)
    }

    async fn notify(&self, kind: NotificationKind, appointment: &Appointment, recipient: Recipient) {
        let notification = Notification {
            kind,
            clinic_id: appointment.clinic_id,
            appointment_id: appointment.id,
            recipient,
        };
        if let Err(e) = self.dispatcher.dispatch(notification).await {
            warn!("Failed to dispatch {:?} for appointment {}: {}", kind, appointment.id, e);
        }
    }

    async fn broadcast(&self, clinic_id: Uuid, broadcast: QueueBroadcast) {
        if let Err(e) = self.broadcaster.broadcast(clinic_id, broadcast).await {
            warn!("Failed to broadcast {:?}: {}", broadcast, e);
        }
    }
}

/// Turn a booking request into an unsaved appointment, reporting every
/// missing reference at once.
fn build_candidate(clinic_id: Uuid, request: &BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
    let mut errors = ValidationErrors::new();

    let (start_time, end_time) = match (request.start_time, request.end_time, request.slot.as_deref()) {
        (Some(start), Some(end), _) => (Some(start), Some(end)),
        (None, None, Some(slot)) => {
            match request
                .utc_offset_minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| format!("invalid UTC offset: {}", request.utc_offset_minutes))
                .and_then(|offset| parse_slot_time(slot, offset))
            {
                Ok((start, end)) => (Some(start), Some(end)),
                Err(message) => {
                    errors.add(AppointmentField::StartTime, message);
                    (None, None)
                }
            }
        }
        (start, end, _) => (start, end),
    };

    if request.patient_id.is_none() {
        errors.add(AppointmentField::PatientId, REQUIRED);
    }
    if request.doctor_id.is_none() {
        errors.add(AppointmentField::DoctorId, REQUIRED);
    }
    if request.appointment_type_id.is_none() {
        errors.add(AppointmentField::AppointmentTypeId, REQUIRED);
    }
    // a malformed slot already explains both missing times
    if !errors.has_error_on(AppointmentField::StartTime) {
        if start_time.is_none() {
            errors.add(AppointmentField::StartTime, REQUIRED);
        }
        if end_time.is_none() {
            errors.add(AppointmentField::EndTime, REQUIRED);
        }
    }

    let (
        Some(patient_id),
        Some(doctor_id),
        Some(appointment_type_id),
        Some(start_time),
        Some(end_time),
    ) = (
        request.patient_id,
        request.doctor_id,
        request.appointment_type_id,
        start_time,
        end_time,
    )
    else {
        return Err(errors.into());
    };

    let now = Utc::now();
    let mut appointment = Appointment {
        id: Uuid::new_v4(),
        clinic_id,
        patient_id,
        doctor_id,
        appointment_type_id,
        referencer_doctor_id: request.referencer_doctor_id,
        patient_package_id: request.patient_package_id,
        start_time,
        end_time,
        is_all_day: request.is_all_day,
        assisted: request.assisted,
        canceled: false,
        confirmed: request.confirmed,
        recursive: false,
        patient_validated: false,
        patient_validate_failed: false,
        reminder_sent: false,
        frequency: request.frequency,
        frequency_number: request.frequency_number.unwrap_or(1).max(1),
        // the only status set outside the state machine
        status: if request.assisted {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::JustCreated
        },
        parent_id: None,
        series_id: None,
        description: request.description.clone(),
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };
    appointment.normalize_all_day();

    Ok(appointment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn request() -> BookAppointmentRequest {
        let start = Utc.with_ymd_and_hms(2031, 3, 4, 10, 0, 0).unwrap();
        BookAppointmentRequest {
            patient_id: Some(Uuid::new_v4()),
            doctor_id: Some(Uuid::new_v4()),
            appointment_type_id: Some(Uuid::new_v4()),
            start_time: Some(start),
            end_time: Some(start + Duration::hours(1)),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_references_are_reported_together() {
        let error = build_candidate(Uuid::new_v4(), &BookAppointmentRequest::default()).unwrap_err();
        let errors = error.validation_errors().unwrap();

        for field in [
            AppointmentField::PatientId,
            AppointmentField::DoctorId,
            AppointmentField::AppointmentTypeId,
            AppointmentField::StartTime,
            AppointmentField::EndTime,
        ] {
            assert!(errors.has_error_on(field), "missing error on {}", field);
        }
    }

    #[test]
    fn test_assisted_booking_starts_confirmed() {
        let mut assisted = request();
        assisted.assisted = true;
        let candidate = build_candidate(Uuid::new_v4(), &assisted).unwrap();
        assert_eq!(candidate.status, AppointmentStatus::Confirmed);

        let plain = build_candidate(Uuid::new_v4(), &request()).unwrap();
        assert_eq!(plain.status, AppointmentStatus::JustCreated);
        assert_eq!(plain.frequency_number, 1);
    }

    #[test]
    fn test_slot_notation_fills_times() {
        let mut slotted = request();
        slotted.start_time = None;
        slotted.end_time = None;
        slotted.slot = Some("04-03-2031-9-30".to_string());
        slotted.utc_offset_minutes = -180;

        let candidate = build_candidate(Uuid::new_v4(), &slotted).unwrap();
        assert_eq!(candidate.start_time, Utc.with_ymd_and_hms(2031, 3, 4, 12, 30, 0).unwrap());
        assert_eq!(candidate.duration_minutes(), 30);

        slotted.slot = Some("04-03-2031".to_string());
        let error = build_candidate(Uuid::new_v4(), &slotted).unwrap_err();
        let errors = error.validation_errors().unwrap();
        assert!(errors.has_error_on(AppointmentField::StartTime));
        assert!(!errors.has_error_on(AppointmentField::EndTime));
    }

    #[test]
    fn test_moving_start_keeps_duration() {
        let candidate = build_candidate(Uuid::new_v4(), &request()).unwrap();
        let moved = apply_update(
            &candidate,
            &UpdateAppointmentRequest {
                start_time: Some(candidate.start_time + Duration::hours(2)),
                ..Default::default()
            },
        );

        assert_eq!(moved.duration_minutes(), 60);
        let changes = ChangeSet::between(&candidate, &moved);
        assert!(changes.start_changed && changes.end_changed);
        assert!(changes.notifies_update());
    }

    #[test]
    fn test_cancel_change_suppresses_update_notification() {
        let candidate = build_candidate(Uuid::new_v4(), &request()).unwrap();
        let canceled = apply_update(
            &candidate,
            &UpdateAppointmentRequest {
                start_time: Some(candidate.start_time + Duration::hours(2)),
                canceled: Some(true),
                ..Default::default()
            },
        );

        let changes = ChangeSet::between(&candidate, &canceled);
        assert!(changes.canceled_changed);
        assert!(!changes.notifies_update());
    }

    #[test]
    fn test_frequency_null_clears_recurrence() {
        let mut recurring = request();
        recurring.frequency = Some(crate::models::Frequency::Weekly);
        let candidate = build_candidate(Uuid::new_v4(), &recurring).unwrap();

        let cleared = apply_update(
            &candidate,
            &UpdateAppointmentRequest {
                frequency: Some(None),
                ..Default::default()
            },
        );
        assert_eq!(cleared.frequency, None);
        assert!(ChangeSet::between(&candidate, &cleared).frequency_changed);
    }
}
