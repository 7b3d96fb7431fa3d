mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::error::AppointmentError;
use appointment_cell::models::{Appointment, AppointmentStatus, LifecycleEvent, PatientPackage, UpdateAppointmentRequest};
use appointment_cell::services::{
    AppointmentStore, Billable, CascadeOutcome, FinancialRecordLedger, SkipReason,
};

use common::{hour_booking, tuesday_at, TestContext};

/// Three appointments of one patient sharing a package, an hour apart.
async fn package_with_appointments(ctx: &TestContext) -> (PatientPackage, Vec<Appointment>) {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let package = ctx.package(patient).await;

    let mut appointments = Vec::new();
    for hour in [9, 11, 13] {
        let mut request = hour_booking(doctor, tuesday_at(hour, 0));
        request.patient_id = Some(patient);
        request.patient_package_id = Some(package.id);
        appointments.push(ctx.service.book_appointment(ctx.clinic_id, request).await.unwrap());
    }
    (package, appointments)
}

async fn reload(ctx: &TestContext, appointments: &[Appointment]) -> Vec<Appointment> {
    let mut reloaded = Vec::new();
    for appointment in appointments {
        reloaded.push(
            ctx.store
                .find_with_canceled(ctx.clinic_id, appointment.id)
                .await
                .unwrap()
                .unwrap(),
        );
    }
    reloaded
}

#[tokio::test]
async fn test_bill_propagates_to_live_package_siblings() {
    let ctx = TestContext::new();
    let (_, appointments) = package_with_appointments(&ctx).await;

    let outcome = ctx
        .service
        .fire_event(ctx.clinic_id, appointments[0].id, LifecycleEvent::Bill)
        .await
        .unwrap();
    assert_eq!(outcome.package, Some(CascadeOutcome::Applied { affected: 3 }));

    for appointment in reload(&ctx, &appointments).await {
        assert_eq!(appointment.status, AppointmentStatus::Billed);
    }
}

#[tokio::test]
async fn test_bill_on_deleted_package_leaves_siblings_untouched() {
    let ctx = TestContext::new();
    let (package, appointments) = package_with_appointments(&ctx).await;
    ctx.store.soft_delete_package(package.id).await.unwrap();

    let outcome = ctx
        .service
        .fire_event(ctx.clinic_id, appointments[0].id, LifecycleEvent::Bill)
        .await
        .unwrap();
    assert_eq!(
        outcome.package,
        Some(CascadeOutcome::Skipped { reason: SkipReason::PackageDeleted })
    );

    let reloaded = reload(&ctx, &appointments).await;
    assert_eq!(reloaded[0].status, AppointmentStatus::Billed);
    assert_eq!(reloaded[1].status, AppointmentStatus::JustCreated);
    assert_eq!(reloaded[2].status, AppointmentStatus::JustCreated);
}

#[tokio::test]
async fn test_assistance_propagates_with_status() {
    let ctx = TestContext::new();
    let (_, appointments) = package_with_appointments(&ctx).await;

    let updated = ctx
        .service
        .update_appointment(
            ctx.clinic_id,
            appointments[1].id,
            UpdateAppointmentRequest {
                assisted: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.assisted);

    for appointment in reload(&ctx, &appointments).await {
        assert!(appointment.assisted);
        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    }
}

#[tokio::test]
async fn test_cancel_propagates_to_package() {
    let ctx = TestContext::new();
    let (_, appointments) = package_with_appointments(&ctx).await;

    ctx.service
        .cancel_appointment(ctx.clinic_id, appointments[2].id, None, false)
        .await
        .unwrap();

    assert!(reload(&ctx, &appointments).await.iter().all(|appointment| appointment.canceled));
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 0);
}

#[tokio::test]
async fn test_cascade_does_not_leak_into_other_packages() {
    let ctx = TestContext::new();
    let (_, first) = package_with_appointments(&ctx).await;

    let patient = Uuid::new_v4();
    let other = ctx.package(patient).await;
    let mut request = hour_booking(Uuid::new_v4(), tuesday_at(9, 0));
    request.patient_id = Some(patient);
    request.patient_package_id = Some(other.id);
    let outsider = ctx.service.book_appointment(ctx.clinic_id, request).await.unwrap();

    ctx.service
        .fire_event(ctx.clinic_id, first[0].id, LifecycleEvent::Bill)
        .await
        .unwrap();

    let untouched = ctx.service.get_appointment(ctx.clinic_id, outsider.id).await.unwrap();
    assert_eq!(untouched.status, AppointmentStatus::JustCreated);
}

#[tokio::test]
async fn test_booking_with_unknown_package_fails() {
    let ctx = TestContext::new();
    let mut request = hour_booking(Uuid::new_v4(), tuesday_at(9, 0));
    request.patient_package_id = Some(Uuid::new_v4());

    assert_matches!(
        ctx.service.book_appointment(ctx.clinic_id, request).await,
        Err(AppointmentError::PackageNotFound)
    );
}

#[tokio::test]
async fn test_print_opens_financial_lines_with_pre_registration() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.pre_registration_enabled = true).await;
    let (package, appointments) = package_with_appointments(&ctx).await;

    for appointment in &appointments {
        ctx.service
            .fire_event(ctx.clinic_id, appointment.id, LifecycleEvent::Print)
            .await
            .unwrap();
    }

    let patient = appointments[0].patient_id;
    let lines = ctx.ledger.lines_for_patient(ctx.clinic_id, patient).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].billable, Billable::PatientPackage(package.id));
    assert_eq!(lines[0].appointment_ids.len(), 3);
}

#[tokio::test]
async fn test_print_bills_appointment_type_outside_packages() {
    let ctx = TestContext::new();
    let doctor = Uuid::new_v4();
    let patient = Uuid::new_v4();
    let appointment_type = Uuid::new_v4();

    let mut ids = Vec::new();
    for start in [tuesday_at(9, 0), tuesday_at(9, 0) + Duration::days(1)] {
        let mut request = hour_booking(doctor, start);
        request.patient_id = Some(patient);
        request.appointment_type_id = Some(appointment_type);
        ids.push(ctx.service.book_appointment(ctx.clinic_id, request).await.unwrap().id);
    }

    // pre-registration off: no ledger activity
    ctx.service
        .fire_event(ctx.clinic_id, ids[0], LifecycleEvent::Print)
        .await
        .unwrap();
    assert!(ctx.ledger.lines_for_patient(ctx.clinic_id, patient).await.unwrap().is_empty());

    ctx.configure(|settings| settings.pre_registration_enabled = true).await;
    for id in &ids {
        ctx.service
            .fire_event(ctx.clinic_id, *id, LifecycleEvent::Print)
            .await
            .unwrap();
    }

    let lines = ctx.ledger.lines_for_patient(ctx.clinic_id, patient).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].billable, Billable::AppointmentType(appointment_type));
    assert_eq!(lines[0].appointment_ids, ids);
}
