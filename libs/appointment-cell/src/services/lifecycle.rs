// libs/appointment-cell/src/services/lifecycle.rs
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::ClinicSettings;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentField, AppointmentStatus, LifecycleEvent};

const ALL_EVENTS: [LifecycleEvent; 9] = [
    LifecycleEvent::Start,
    LifecycleEvent::Finalize,
    LifecycleEvent::Print,
    LifecycleEvent::Complete,
    LifecycleEvent::Confirm,
    LifecycleEvent::ValidatePatient,
    LifecycleEvent::ValidatePatientFailed,
    LifecycleEvent::Bill,
    LifecycleEvent::ResetToCreated,
];

/// Work requested by a transition. The state machine never performs it;
/// the booking service executes each intent after persisting the new status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    RecordEventLog { status: AppointmentStatus },
    HidePatientFromQueue { doctor_id: Uuid },
    PickNextPatient { doctor_id: Uuid },
    NotifyVisitRecordDone,
    CreateFinancialRecordLine,
    NotifyReferencingDoctor { referencer_doctor_id: Uuid },
    BroadcastNewPatient { doctor_id: Uuid },
    PropagateBilledToPackage { package_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub event: LifecycleEvent,
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub effects: Vec<SideEffect>,
}

/// Source states an event is restricted to; `None` means any state.
pub fn allowed_sources(event: LifecycleEvent) -> Option<&'static [AppointmentStatus]> {
    match event {
        LifecycleEvent::Finalize => Some(&[AppointmentStatus::BeingAttended]),
        LifecycleEvent::Complete => Some(&[AppointmentStatus::WaitingForResults]),
        _ => None,
    }
}

pub fn destination(event: LifecycleEvent) -> AppointmentStatus {
    match event {
        LifecycleEvent::Start => AppointmentStatus::BeingAttended,
        LifecycleEvent::Finalize => AppointmentStatus::WaitingForResults,
        LifecycleEvent::Print => AppointmentStatus::PatientBeingValidated,
        LifecycleEvent::Complete => AppointmentStatus::Completed,
        LifecycleEvent::Confirm => AppointmentStatus::Confirmed,
        LifecycleEvent::ValidatePatient => AppointmentStatus::Arrived,
        LifecycleEvent::ValidatePatientFailed => AppointmentStatus::FailedValidation,
        LifecycleEvent::Bill => AppointmentStatus::Billed,
        LifecycleEvent::ResetToCreated => AppointmentStatus::JustCreated,
    }
}

pub fn can_fire(status: AppointmentStatus, event: LifecycleEvent) -> bool {
    allowed_sources(event).map_or(true, |sources| sources.contains(&status))
}

/// Every event that may be fired from `status`.
pub fn available_events(status: AppointmentStatus) -> Vec<LifecycleEvent> {
    ALL_EVENTS
        .iter()
        .copied()
        .filter(|event| can_fire(status, *event))
        .collect()
}

/// Compute the destination state and the side effects of firing `event`.
pub fn transition(
    appointment: &Appointment,
    event: LifecycleEvent,
    settings: &ClinicSettings,
) -> Result<Transition, AppointmentError> {
    let from = appointment.status;
    debug!("Evaluating {} on appointment {} in {}", event, appointment.id, from);

    if !can_fire(from, event) {
        warn!("Rejected lifecycle event {} from {} on {}", event, from, appointment.id);
        return Err(AppointmentError::guard(
            AppointmentField::Status,
            format!("cannot {} an appointment that is {}", event, from),
        ));
    }

    let to = destination(event);
    let mut effects = vec![SideEffect::RecordEventLog { status: to }];

    match event {
        LifecycleEvent::Start => effects.push(SideEffect::HidePatientFromQueue {
            doctor_id: appointment.doctor_id,
        }),
        LifecycleEvent::Finalize => {
            effects.push(SideEffect::PickNextPatient {
                doctor_id: appointment.doctor_id,
            });
            effects.push(SideEffect::NotifyVisitRecordDone);
        }
        LifecycleEvent::Print => {
            if settings.pre_registration_enabled {
                effects.push(SideEffect::CreateFinancialRecordLine);
            }
        }
        LifecycleEvent::Complete => {
            if let Some(referencer_doctor_id) = appointment.referencer_doctor_id {
                effects.push(SideEffect::NotifyReferencingDoctor { referencer_doctor_id });
            }
        }
        LifecycleEvent::ValidatePatient => effects.push(SideEffect::BroadcastNewPatient {
            doctor_id: appointment.doctor_id,
        }),
        LifecycleEvent::Bill => {
            if let Some(package_id) = appointment.patient_package_id {
                effects.push(SideEffect::PropagateBilledToPackage { package_id });
            }
        }
        LifecycleEvent::Confirm
        | LifecycleEvent::ValidatePatientFailed
        | LifecycleEvent::ResetToCreated => {}
    }

    Ok(Transition {
        event,
        from,
        to,
        effects,
    })
}

/// The assistance flag is settled once the appointment leaves `just_created`.
pub fn check_assisted_change(appointment: &Appointment, assisted: bool) -> Result<(), AppointmentError> {
    if assisted != appointment.assisted && appointment.status != AppointmentStatus::JustCreated {
        return Err(AppointmentError::guard(
            AppointmentField::Assisted,
            format!(
                "assistance cannot change once the appointment is {}",
                appointment.status
            ),
        ));
    }
    Ok(())
}

/// Canceling is locked while the patient is inside the clinic flow, but only
/// when the clinic audits appointment states.
pub fn check_cancel(appointment: &Appointment, settings: &ClinicSettings) -> Result<(), AppointmentError> {
    if settings.enable_appointment_state_log && appointment.cancel_locked() {
        return Err(AppointmentError::CannotCancel {
            status: appointment.status,
        });
    }
    Ok(())
}
