// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_type_id: Uuid,
    pub referencer_doctor_id: Option<Uuid>,
    pub patient_package_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_all_day: bool,
    pub assisted: bool,
    pub canceled: bool,
    pub confirmed: bool,
    pub recursive: bool,
    pub patient_validated: bool,
    pub patient_validate_failed: bool,
    pub reminder_sent: bool,
    pub frequency: Option<Frequency>,
    pub frequency_number: u32,
    pub status: AppointmentStatus,
    /// Recurrence parent; `None` for bookings made directly.
    pub parent_id: Option<Uuid>,
    /// Shared by every member of a recurring series, equal to the root's id.
    pub series_id: Option<Uuid>,
    pub description: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Length of the booking in minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// Offset between two consecutive members of this appointment's series.
    pub fn frequency_time(&self) -> Option<RecurrenceStep> {
        self.frequency
            .map(|frequency| frequency.step(self.frequency_number))
    }

    pub fn is_series_member(&self) -> bool {
        self.series_id.is_some()
    }

    /// Root of the series this appointment belongs to, if any.
    pub fn series_root(&self) -> Option<Uuid> {
        self.series_id.or(self.parent_id)
    }

    /// Snap all-day bookings to the boundaries of their start day.
    pub fn normalize_all_day(&mut self) {
        if !self.is_all_day {
            return;
        }

        let day = self.start_time.date_naive();
        if let (Some(start), Some(end)) = (day.and_hms_opt(0, 0, 0), day.and_hms_opt(23, 59, 59)) {
            self.start_time = start.and_utc();
            self.end_time = end.and_utc();
        }
    }

    /// Whether canceling is locked once state auditing is on.
    pub fn cancel_locked(&self) -> bool {
        self.status.is_cancel_locked()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    JustCreated,
    Confirmed,
    PatientBeingValidated,
    Arrived,
    WaitingInReception,
    BeingAttended,
    WaitingForResults,
    Completed,
    FailedValidation,
    Billed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::JustCreated => "just_created",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::PatientBeingValidated => "patient_being_validated",
            AppointmentStatus::Arrived => "arrived",
            AppointmentStatus::WaitingInReception => "waiting_in_reception",
            AppointmentStatus::BeingAttended => "being_attended",
            AppointmentStatus::WaitingForResults => "waiting_for_results",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::FailedValidation => "failed_validation",
            AppointmentStatus::Billed => "billed",
        }
    }

    /// States in which the patient is already being handled by the clinic.
    pub fn is_cancel_locked(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::PatientBeingValidated
                | AppointmentStatus::Arrived
                | AppointmentStatus::WaitingInReception
                | AppointmentStatus::BeingAttended
                | AppointmentStatus::WaitingForResults
                | AppointmentStatus::Completed
        )
    }
}

impl Default for AppointmentStatus {
    fn default() -> Self {
        AppointmentStatus::JustCreated
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named events that drive the appointment through its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start,
    Finalize,
    Print,
    Complete,
    Confirm,
    ValidatePatient,
    ValidatePatientFailed,
    Bill,
    ResetToCreated,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::Finalize => "finalize",
            LifecycleEvent::Print => "print",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Confirm => "confirm",
            LifecycleEvent::ValidatePatient => "validate_patient",
            LifecycleEvent::ValidatePatientFailed => "validate_patient_failed",
            LifecycleEvent::Bill => "bill",
            LifecycleEvent::ResetToCreated => "reset_to_created",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "start" => Ok(LifecycleEvent::Start),
            "finalize" => Ok(LifecycleEvent::Finalize),
            "print" => Ok(LifecycleEvent::Print),
            "complete" => Ok(LifecycleEvent::Complete),
            "confirm" => Ok(LifecycleEvent::Confirm),
            "validate_patient" => Ok(LifecycleEvent::ValidatePatient),
            "validate_patient_failed" => Ok(LifecycleEvent::ValidatePatientFailed),
            "bill" => Ok(LifecycleEvent::Bill),
            "reset_to_created" => Ok(LifecycleEvent::ResetToCreated),
            other => Err(format!("unknown lifecycle event: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Weekly,
    Biweekly,
    Yearly,
}

impl Frequency {
    /// Calendar offset between consecutive members; biweekly ignores `count`.
    pub fn step(&self, count: u32) -> RecurrenceStep {
        let count = count.max(1);
        match self {
            Frequency::Monthly => RecurrenceStep::Months(count),
            Frequency::Weekly => RecurrenceStep::Weeks(count),
            Frequency::Biweekly => RecurrenceStep::Weeks(2),
            Frequency::Yearly => RecurrenceStep::Months(count.saturating_mul(12)),
        }
    }
}

/// Calendar-aware offset. Month arithmetic clamps to the end of shorter months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceStep {
    Weeks(u32),
    Months(u32),
}

impl RecurrenceStep {
    /// The `n`-th multiple of this step applied to `time`.
    pub fn nth_after(&self, time: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceStep::Weeks(weeks) => i64::from(*weeks)
                .checked_mul(i64::from(n))
                .and_then(Duration::try_weeks)
                .and_then(|offset| time.checked_add_signed(offset)),
            RecurrenceStep::Months(months) => {
                time.checked_add_months(chrono::Months::new(months.checked_mul(n)?))
            }
        }
    }
}

/// Immutable audit row written for every lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentEventLog {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

impl AppointmentEventLog {
    pub fn new(appointment_id: Uuid, status: AppointmentStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            status,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientPackage {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PatientPackage {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ==============================================================================
// VALIDATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentField {
    Base,
    PatientId,
    DoctorId,
    AppointmentTypeId,
    StartTime,
    EndTime,
    Frequency,
    Assisted,
    Canceled,
    Status,
    PatientValidateFailed,
}

impl fmt::Display for AppointmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppointmentField::Base => "base",
            AppointmentField::PatientId => "patient_id",
            AppointmentField::DoctorId => "doctor_id",
            AppointmentField::AppointmentTypeId => "appointment_type_id",
            AppointmentField::StartTime => "start_time",
            AppointmentField::EndTime => "end_time",
            AppointmentField::Frequency => "frequency",
            AppointmentField::Assisted => "assisted",
            AppointmentField::Canceled => "canceled",
            AppointmentField::Status => "status",
            AppointmentField::PatientValidateFailed => "patient_validate_failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: AppointmentField,
    pub message: String,
}

/// Every field error gathered while validating one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: AppointmentField, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn on(&self, field: AppointmentField) -> Vec<&FieldError> {
        self.0.iter().filter(|error| error.field == field).collect()
    }

    pub fn has_error_on(&self, field: AppointmentField) -> bool {
        self.0.iter().any(|error| error.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .0
            .iter()
            .map(|error| format!("{} {}", error.field, error.message))
            .collect();
        write!(f, "{}", messages.join(", "))
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// References are optional on the wire so that missing ones can be
/// reported together with every other field error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub appointment_type_id: Option<Uuid>,
    pub referencer_doctor_id: Option<Uuid>,
    pub patient_package_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub assisted: bool,
    #[serde(default)]
    pub confirmed: bool,
    pub frequency: Option<Frequency>,
    pub frequency_number: Option<u32>,
    pub description: Option<String>,
    /// Calendar-click slot in `dd-mm-yyyy-h-mm`, used when no times are sent.
    pub slot: Option<String>,
    /// Offset of `slot` from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub appointment_type_id: Option<Uuid>,
    pub referencer_doctor_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_all_day: Option<bool>,
    pub assisted: Option<bool>,
    pub canceled: Option<bool>,
    pub cancellation_reason: Option<String>,
    /// `null` clears the recurrence, an absent key leaves it untouched.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub frequency: Option<Option<Frequency>>,
    pub frequency_number: Option<u32>,
    pub patient_validated: Option<bool>,
    pub patient_validate_failed: Option<bool>,
    pub description: Option<String>,
    /// Apply a time shift to this and every later member of the series.
    #[serde(default)]
    pub apply_from_now_on: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
    /// Also remove the generated members of the series.
    #[serde(default)]
    pub series: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_canceled: bool,
}

impl AppointmentQuery {
    /// Range semantics: starts inside, ends inside, or spans the window.
    pub fn matches(&self, appointment: &Appointment) -> bool {
        if !self.include_canceled && appointment.canceled {
            return false;
        }
        if self.doctor_id.is_some_and(|doctor| doctor != appointment.doctor_id) {
            return false;
        }
        if self.patient_id.is_some_and(|patient| patient != appointment.patient_id) {
            return false;
        }

        match (self.from, self.to) {
            (Some(from), Some(to)) => {
                let starts_inside = appointment.start_time >= from && appointment.start_time <= to;
                let ends_inside = appointment.end_time >= from && appointment.end_time <= to;
                let spans = appointment.start_time < from && to < appointment.end_time;
                starts_inside || ends_inside || spans
            }
            (Some(from), None) => appointment.start_time >= from,
            (None, Some(to)) => appointment.start_time <= to,
            (None, None) => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
}

/// Parse the compact `dd-mm-yyyy-h-mm` slot notation used by calendar
/// clicks into a 30 minute slot expressed in UTC.
pub fn parse_slot_time(
    input: &str,
    offset: FixedOffset,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let invalid = || format!("invalid slot time format: '{}'", input);

    let parts: Vec<u32> = input
        .split('-')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;

    let &[day, month, year, hour, minute] = parts.as_slice() else {
        return Err(invalid());
    };

    let year = i32::try_from(year).map_err(|_| invalid())?;
    let local = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(invalid)?;

    let start = offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(invalid)?
        .with_timezone(&Utc);

    Ok((start, start + Duration::minutes(30)))
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appointment_at(start: DateTime<Utc>) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            appointment_type_id: Uuid::new_v4(),
            referencer_doctor_id: None,
            patient_package_id: None,
            start_time: start,
            end_time: start + Duration::minutes(30),
            is_all_day: false,
            assisted: false,
            canceled: false,
            confirmed: false,
            recursive: false,
            patient_validated: false,
            patient_validate_failed: false,
            reminder_sent: false,
            frequency: None,
            frequency_number: 1,
            status: AppointmentStatus::JustCreated,
            parent_id: None,
            series_id: None,
            description: None,
            cancellation_reason: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_frequency_time_without_frequency_is_none() {
        let appointment = appointment_at(Utc::now());
        assert_eq!(appointment.frequency_time(), None);
    }

    #[test]
    fn test_frequency_steps() {
        assert_eq!(Frequency::Monthly.step(1), RecurrenceStep::Months(1));
        assert_eq!(Frequency::Weekly.step(3), RecurrenceStep::Weeks(3));
        assert_eq!(Frequency::Biweekly.step(5), RecurrenceStep::Weeks(2));
        assert_eq!(Frequency::Yearly.step(2), RecurrenceStep::Months(24));
    }

    #[test]
    fn test_month_step_clamps_to_end_of_month() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        let next = RecurrenceStep::Months(1).nth_after(start, 1).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_all_day_normalization() {
        let mut appointment = appointment_at(Utc.with_ymd_and_hms(2025, 3, 12, 10, 30, 0).unwrap());
        appointment.is_all_day = true;
        appointment.normalize_all_day();

        assert_eq!(appointment.start_time, Utc.with_ymd_and_hms(2025, 3, 12, 0, 0, 0).unwrap());
        assert_eq!(appointment.end_time, Utc.with_ymd_and_hms(2025, 3, 12, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_parse_slot_time() {
        let offset = FixedOffset::west_opt(6 * 3600).unwrap();
        let (start, end) = parse_slot_time("20-12-1990-8-00", offset).unwrap();

        assert_eq!(start, Utc.with_ymd_and_hms(1990, 12, 20, 14, 0, 0).unwrap());
        assert_eq!(end - start, Duration::minutes(30));
    }

    #[test]
    fn test_parse_slot_time_rejects_garbage() {
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(parse_slot_time("unformatted string", offset).is_err());
        assert!(parse_slot_time("31-02-2020-8-00", offset).is_err());
    }

    #[test]
    fn test_update_request_distinguishes_null_frequency() {
        let cleared: UpdateAppointmentRequest =
            serde_json::from_str(r#"{"frequency": null}"#).unwrap();
        let untouched: UpdateAppointmentRequest = serde_json::from_str("{}").unwrap();

        assert_eq!(cleared.frequency, Some(None));
        assert_eq!(untouched.frequency, None);
    }

    #[test]
    fn test_time_range_query_matches_spanning_appointments() {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let mut appointment = appointment_at(start);
        appointment.end_time = start + Duration::hours(4);

        let query = AppointmentQuery {
            from: Some(start + Duration::hours(1)),
            to: Some(start + Duration::hours(2)),
            ..Default::default()
        };
        assert!(query.matches(&appointment));

        appointment.canceled = true;
        assert!(!query.matches(&appointment));
    }
}
