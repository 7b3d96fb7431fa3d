mod common;

use chrono::{Datelike, Duration, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentField, AppointmentStatus, Frequency, UpdateAppointmentRequest};
use appointment_cell::services::AppointmentStore;

use common::{hour_booking, tuesday_at, TestContext};

async fn book_series(ctx: &TestContext, doctor: Uuid, frequency: Frequency) -> Appointment {
    let mut request = hour_booking(doctor, tuesday_at(10, 0));
    request.frequency = Some(frequency);
    ctx.service.book_appointment(ctx.clinic_id, request).await.unwrap()
}

async fn members(ctx: &TestContext, root: &Appointment) -> Vec<Appointment> {
    ctx.store.series_members(ctx.clinic_id, root.id).await.unwrap()
}

#[tokio::test]
async fn test_monthly_recurrence_generates_inheriting_instances() {
    let ctx = TestContext::new();
    let doctor = Uuid::new_v4();
    let root = book_series(&ctx, doctor, Frequency::Monthly).await;

    assert!(root.recursive);
    assert_eq!(root.series_id, Some(root.id));

    let series = members(&ctx, &root).await;
    assert_eq!(series.len(), 12);
    assert_eq!(series[0].id, root.id);

    for (n, instance) in series.iter().enumerate().skip(1) {
        let expected = root.start_time.checked_add_months(chrono::Months::new(n as u32)).unwrap();
        assert_eq!(instance.start_time, expected);
        assert_eq!(instance.end_time, expected + Duration::hours(1));
        assert_eq!(instance.doctor_id, root.doctor_id);
        assert_eq!(instance.patient_id, root.patient_id);
        assert_eq!(instance.appointment_type_id, root.appointment_type_id);
        assert_eq!(instance.parent_id, Some(root.id));
        assert_eq!(instance.status, AppointmentStatus::JustCreated);
    }
}

#[tokio::test]
async fn test_recurrence_horizon_is_configurable() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 21).await;

    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;
    assert_eq!(members(&ctx, &root).await.len(), 4);
}

#[tokio::test]
async fn test_oversized_horizon_books_a_bounded_series() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = i64::MAX / 2).await;

    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Yearly).await;
    let series = members(&ctx, &root).await;

    // ten years ahead at most, root included
    assert_eq!(series.len(), 11);
    assert!(series.iter().all(|member| member.start_time.year() <= 2041));
}

#[tokio::test]
async fn test_removing_frequency_cancels_generated_instances() {
    let ctx = TestContext::new();
    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Monthly).await;
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 12);

    let updated = ctx
        .service
        .update_appointment(
            ctx.clinic_id,
            root.id,
            UpdateAppointmentRequest {
                frequency: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.frequency, None);
    assert!(!updated.recursive);
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 1);
    assert_eq!(members(&ctx, &root).await.len(), 1);
}

#[tokio::test]
async fn test_series_conflict_aborts_creation_with_first_message() {
    let ctx = TestContext::new();
    let doctor = Uuid::new_v4();

    // Friday 4 April 2031, covering the second monthly occurrence
    let blocker = Utc.with_ymd_and_hms(2031, 4, 4, 9, 30, 0).unwrap();
    ctx.service
        .book_appointment(ctx.clinic_id, hour_booking(doctor, blocker))
        .await
        .unwrap();

    let mut request = hour_booking(doctor, tuesday_at(10, 0));
    request.frequency = Some(Frequency::Monthly);
    let error = ctx
        .service
        .book_appointment(ctx.clinic_id, request)
        .await
        .unwrap_err();

    let errors = error.validation_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.errors()[0].field, AppointmentField::StartTime);
    assert!(errors.errors()[0].message.contains("04/04/2031"));
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 1);
}

#[tokio::test]
async fn test_periodic_notification_clinics_do_not_generate_series() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.notifications_for_periodic_appointments_enabled = true)
        .await;

    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;

    assert_eq!(root.frequency, Some(Frequency::Weekly));
    assert_eq!(root.series_id, None);
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 1);
}

#[tokio::test]
async fn test_apply_from_now_on_shifts_later_members() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 28).await;
    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;

    let series = members(&ctx, &root).await;
    assert_eq!(series.len(), 5);
    let edited = &series[2];

    ctx.service
        .update_appointment(
            ctx.clinic_id,
            edited.id,
            UpdateAppointmentRequest {
                start_time: Some(edited.start_time + Duration::hours(2)),
                apply_from_now_on: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let shifted = members(&ctx, &root).await;
    for (before, after) in series.iter().zip(shifted.iter()) {
        assert_eq!(before.id, after.id);
        if before.start_time < edited.start_time {
            assert_eq!(after.start_time, before.start_time);
        } else {
            assert_eq!(after.start_time, before.start_time + Duration::hours(2));
            assert_eq!(after.duration_minutes(), 60);
        }
    }
}

#[tokio::test]
async fn test_shift_without_flag_moves_a_single_instance() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 28).await;
    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;
    let series = members(&ctx, &root).await;

    ctx.service
        .update_appointment(
            ctx.clinic_id,
            series[1].id,
            UpdateAppointmentRequest {
                start_time: Some(series[1].start_time + Duration::hours(2)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let after = members(&ctx, &root).await;
    assert_eq!(after[1].start_time, series[1].start_time + Duration::hours(2));
    assert_eq!(after[2].start_time, series[2].start_time);
    assert_eq!(after[4].start_time, series[4].start_time);
}

#[tokio::test]
async fn test_forward_shift_conflict_writes_nothing() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 28).await;
    let doctor = Uuid::new_v4();
    let root = book_series(&ctx, doctor, Frequency::Weekly).await;
    let series = members(&ctx, &root).await;

    // busy right after the last member
    let last = series[4].clone();
    ctx.service
        .book_appointment(ctx.clinic_id, hour_booking(doctor, last.end_time))
        .await
        .unwrap();

    let error = ctx
        .service
        .update_appointment(
            ctx.clinic_id,
            series[2].id,
            UpdateAppointmentRequest {
                start_time: Some(series[2].start_time + Duration::hours(1)),
                apply_from_now_on: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(error.validation_errors().unwrap().has_error_on(AppointmentField::StartTime));

    let unchanged = members(&ctx, &root).await;
    let starts: Vec<_> = unchanged.iter().map(|member| member.start_time).collect();
    let before: Vec<_> = series.iter().map(|member| member.start_time).collect();
    assert_eq!(starts, before);
}

#[tokio::test]
async fn test_setting_frequency_on_update_materializes_series() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 14).await;

    let single = ctx
        .service
        .book_appointment(ctx.clinic_id, hour_booking(Uuid::new_v4(), tuesday_at(10, 0)))
        .await
        .unwrap();

    let root = ctx
        .service
        .update_appointment(
            ctx.clinic_id,
            single.id,
            UpdateAppointmentRequest {
                frequency: Some(Some(Frequency::Weekly)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(root.series_id, Some(root.id));
    assert_eq!(members(&ctx, &root).await.len(), 3);
}

#[tokio::test]
async fn test_setting_frequency_reports_conflict_on_frequency() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 14).await;
    let doctor = Uuid::new_v4();

    ctx.service
        .book_appointment(ctx.clinic_id, hour_booking(doctor, tuesday_at(10, 0) + Duration::weeks(2)))
        .await
        .unwrap();
    let single = ctx
        .service
        .book_appointment(ctx.clinic_id, hour_booking(doctor, tuesday_at(10, 0)))
        .await
        .unwrap();

    let error = ctx
        .service
        .update_appointment(
            ctx.clinic_id,
            single.id,
            UpdateAppointmentRequest {
                frequency: Some(Some(Frequency::Weekly)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(error.validation_errors().unwrap().has_error_on(AppointmentField::Frequency));
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 2);
}

#[tokio::test]
async fn test_changing_frequency_replaces_the_series() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 28).await;
    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;
    assert_eq!(members(&ctx, &root).await.len(), 5);

    ctx.service
        .update_appointment(
            ctx.clinic_id,
            root.id,
            UpdateAppointmentRequest {
                frequency: Some(Some(Frequency::Biweekly)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let series = members(&ctx, &root).await;
    assert_eq!(series.len(), 3);
    assert_eq!(series[1].start_time, root.start_time + Duration::weeks(2));
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 3);
}

#[tokio::test]
async fn test_whole_series_cancel_from_a_generated_instance() {
    let ctx = TestContext::new();
    ctx.configure(|settings| settings.recurrence_horizon_days = 28).await;
    let root = book_series(&ctx, Uuid::new_v4(), Frequency::Weekly).await;
    let series = members(&ctx, &root).await;

    ctx.service
        .cancel_appointment(ctx.clinic_id, series[3].id, None, false)
        .await
        .unwrap();
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 4);

    ctx.service
        .cancel_appointment(ctx.clinic_id, series[1].id, Some("moving abroad".to_string()), true)
        .await
        .unwrap();
    assert_eq!(ctx.store.count(ctx.clinic_id).await, 0);
}
