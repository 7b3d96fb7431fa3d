#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::models::{BookAppointmentRequest, PatientPackage};
use appointment_cell::services::{
    AppointmentBookingService, InMemoryAppointmentStore, InMemoryClinicSettings,
    InMemoryFinancialRecordLedger, LoggingNotificationDispatcher, NotificationDispatcher,
};
use shared_config::ClinicSettings;

/// Tuesday, 4 March 2031 at `hour:minute` UTC.
pub fn tuesday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 3, 4, hour, minute, 0).unwrap()
}

/// Sunday, 9 March 2031 at `hour:00` UTC.
pub fn sunday_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 3, 9, hour, 0, 0).unwrap()
}

pub fn booking(doctor_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> BookAppointmentRequest {
    BookAppointmentRequest {
        patient_id: Some(Uuid::new_v4()),
        doctor_id: Some(doctor_id),
        appointment_type_id: Some(Uuid::new_v4()),
        start_time: Some(start),
        end_time: Some(end),
        ..Default::default()
    }
}

pub fn hour_booking(doctor_id: Uuid, start: DateTime<Utc>) -> BookAppointmentRequest {
    booking(doctor_id, start, start + Duration::hours(1))
}

pub struct TestContext {
    pub clinic_id: Uuid,
    pub store: Arc<InMemoryAppointmentStore>,
    pub settings: Arc<InMemoryClinicSettings>,
    pub ledger: Arc<InMemoryFinancialRecordLedger>,
    pub service: AppointmentBookingService,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_dispatcher(Arc::new(LoggingNotificationDispatcher))
    }

    pub fn with_dispatcher(dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let store = Arc::new(InMemoryAppointmentStore::new());
        let settings = Arc::new(InMemoryClinicSettings::new(ClinicSettings::default()));
        let ledger = Arc::new(InMemoryFinancialRecordLedger::new());

        let service = AppointmentBookingService::new(store.clone(), settings.clone())
            .with_dispatcher(dispatcher)
            .with_ledger(ledger.clone());

        Self {
            clinic_id: Uuid::new_v4(),
            store,
            settings,
            ledger,
            service,
        }
    }

    pub async fn configure<F>(&self, change: F)
    where
        F: FnOnce(&mut ClinicSettings) + Send,
    {
        self.settings.update(self.clinic_id, change).await;
    }

    pub async fn package(&self, patient_id: Uuid) -> PatientPackage {
        let package = PatientPackage {
            id: Uuid::new_v4(),
            clinic_id: self.clinic_id,
            patient_id,
            name: "Physiotherapy x10".to_string(),
            deleted_at: None,
        };
        self.store.put_package(package.clone()).await;
        package
    }
}
