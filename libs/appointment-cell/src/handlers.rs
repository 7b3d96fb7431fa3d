// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AppointmentQuery, BookAppointmentRequest, CancelAppointmentRequest, LifecycleEvent,
    UpdateAppointmentRequest,
};
use crate::router::AppointmentCellState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(clinic_id): Path<Uuid>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.booking.book_appointment(clinic_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": appointment,
            "message": "Appointment booked successfully"
        })),
    ))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<AppointmentQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state.booking.list_appointments(clinic_id, &query).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(clinic_id, appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .update_appointment(clinic_id, appointment_id, request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .cancel_appointment(clinic_id, appointment_id, request.reason, request.series)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment canceled successfully"
    })))
}

// ==============================================================================
// LIFECYCLE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn fire_lifecycle_event(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id, event)): Path<(Uuid, Uuid, String)>,
) -> Result<Json<Value>, AppError> {
    let event: LifecycleEvent = event.parse().map_err(AppError::BadRequest)?;
    let outcome = state.booking.fire_event(clinic_id, appointment_id, event).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "transition": outcome.transition,
        "package": outcome.package
    })))
}

/// Target of the confirmation link sent with reminders.
#[axum::debug_handler]
pub async fn confirm_by_link(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let confirmed = state.booking.confirm_by_link(clinic_id, appointment_id).await?;

    Ok(Json(json!({
        "success": confirmed,
        "confirmed": confirmed,
        "message": if confirmed {
            "Appointment confirmed"
        } else {
            "Appointment can no longer be confirmed by link"
        }
    })))
}

#[axum::debug_handler]
pub async fn get_event_logs(
    State(state): State<Arc<AppointmentCellState>>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let logs = state.booking.event_logs(clinic_id, appointment_id).await?;

    Ok(Json(json!({
        "appointment_id": appointment_id,
        "event_logs": logs
    })))
}

// ==============================================================================
// UTILITY HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<AppointmentCellState>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let response = state
        .booking
        .check_conflicts(clinic_id, query.doctor_id, query.start_time, query.exclude_appointment_id)
        .await?;

    Ok(Json(json!(response)))
}
