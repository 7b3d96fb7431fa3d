// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentEventLog, AppointmentQuery, AppointmentStatus, PatientPackage,
};

/// Column changes applied in bulk to every appointment of a patient package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageUpdate {
    pub assisted: Option<bool>,
    pub status: Option<AppointmentStatus>,
    pub canceled: Option<bool>,
}

impl PackageUpdate {
    pub fn is_empty(&self) -> bool {
        self.assisted.is_none() && self.status.is_none() && self.canceled.is_none()
    }

    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(assisted) = self.assisted {
            appointment.assisted = assisted;
        }
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(canceled) = self.canceled {
            appointment.canceled = canceled;
        }
    }
}

/// Persistence boundary. Every lookup is scoped by clinic and, unless the
/// method says otherwise, skips canceled appointments.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: &Appointment) -> Result<(), AppointmentError>;

    async fn insert_many(&self, appointments: &[Appointment]) -> Result<usize, AppointmentError>;

    async fn update(&self, appointment: &Appointment) -> Result<(), AppointmentError>;

    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    async fn find_with_canceled(
        &self,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Active bookings of a doctor whose `[start, end)` covers `instant`.
    async fn doctor_appointments_at(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        instant: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Active members of a series ordered by start time, root included.
    async fn series_members(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Soft-cancel every active member of a series except `keep`.
    async fn cancel_series(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
        keep: Uuid,
    ) -> Result<usize, AppointmentError>;

    async fn list(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Package lookup that also returns soft-deleted packages.
    async fn find_package_with_deleted(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PatientPackage>, AppointmentError>;

    /// Atomic bulk update scoped by package id; returns the affected count.
    async fn update_package_appointments(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
        update: &PackageUpdate,
    ) -> Result<usize, AppointmentError>;

    async fn append_event_log(&self, log: &AppointmentEventLog) -> Result<(), AppointmentError>;

    async fn event_logs(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentEventLog>, AppointmentError>;
}

#[derive(Default)]
struct StoreInner {
    appointments: HashMap<Uuid, Appointment>,
    series: HashMap<Uuid, Vec<Uuid>>,
    packages: HashMap<Uuid, PatientPackage>,
    event_logs: Vec<AppointmentEventLog>,
}

impl StoreInner {
    fn index_series(&mut self, appointment: &Appointment) {
        if let Some(series_id) = appointment.series_id {
            let members = self.series.entry(series_id).or_default();
            if !members.contains(&appointment.id) {
                members.push(appointment.id);
            }
        }
    }

    fn unindex_series(&mut self, appointment_id: Uuid, series_id: Option<Uuid>) {
        if let Some(series_id) = series_id {
            if let Some(members) = self.series.get_mut(&series_id) {
                members.retain(|id| *id != appointment_id);
            }
        }
    }

    fn in_clinic(&self, clinic_id: Uuid, id: Uuid) -> Option<&Appointment> {
        self.appointments
            .get(&id)
            .filter(|appointment| appointment.clinic_id == clinic_id)
    }
}

/// Arena of appointments keyed by id with a secondary index per series key.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a patient package.
    pub async fn put_package(&self, package: PatientPackage) {
        let mut inner = self.inner.write().await;
        inner.packages.insert(package.id, package);
    }

    pub async fn soft_delete_package(&self, package_id: Uuid) -> Result<(), AppointmentError> {
        let mut inner = self.inner.write().await;
        let package = inner
            .packages
            .get_mut(&package_id)
            .ok_or(AppointmentError::PackageNotFound)?;
        package.deleted_at = Some(Utc::now());
        Ok(())
    }

    pub async fn count(&self, clinic_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner
            .appointments
            .values()
            .filter(|appointment| appointment.clinic_id == clinic_id && !appointment.canceled)
            .count()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let mut inner = self.inner.write().await;
        if inner.appointments.contains_key(&appointment.id) {
            return Err(AppointmentError::Database(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }

        inner.index_series(appointment);
        inner.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn insert_many(&self, appointments: &[Appointment]) -> Result<usize, AppointmentError> {
        let mut inner = self.inner.write().await;
        if let Some(duplicate) = appointments
            .iter()
            .find(|appointment| inner.appointments.contains_key(&appointment.id))
        {
            return Err(AppointmentError::Database(format!(
                "appointment {} already exists",
                duplicate.id
            )));
        }

        for appointment in appointments {
            inner.index_series(appointment);
            inner.appointments.insert(appointment.id, appointment.clone());
        }

        debug!("Inserted {} appointments", appointments.len());
        Ok(appointments.len())
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let mut inner = self.inner.write().await;
        let previous_series = inner
            .in_clinic(appointment.clinic_id, appointment.id)
            .map(|existing| existing.series_id)
            .ok_or(AppointmentError::NotFound)?;

        if previous_series != appointment.series_id {
            inner.unindex_series(appointment.id, previous_series);
        }
        inner.index_series(appointment);
        inner.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let inner = self.inner.read().await;
        Ok(inner
            .in_clinic(clinic_id, id)
            .filter(|appointment| !appointment.canceled)
            .cloned())
    }

    async fn find_with_canceled(
        &self,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let inner = self.inner.read().await;
        Ok(inner.in_clinic(clinic_id, id).cloned())
    }

    async fn doctor_appointments_at(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        instant: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let inner = self.inner.read().await;
        let mut matches: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|appointment| {
                appointment.clinic_id == clinic_id
                    && appointment.doctor_id == doctor_id
                    && !appointment.canceled
                    && Some(appointment.id) != exclude_id
                    && appointment.start_time <= instant
                    && instant < appointment.end_time
            })
            .cloned()
            .collect();

        matches.sort_by_key(|appointment| appointment.start_time);
        Ok(matches)
    }

    async fn series_members(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let inner = self.inner.read().await;
        let mut members: Vec<Appointment> = inner
            .series
            .get(&series_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.in_clinic(clinic_id, *id))
                    .filter(|appointment| !appointment.canceled)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        members.sort_by_key(|appointment| appointment.start_time);
        Ok(members)
    }

    async fn cancel_series(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
        keep: Uuid,
    ) -> Result<usize, AppointmentError> {
        let mut inner = self.inner.write().await;
        let ids = inner.series.get(&series_id).cloned().unwrap_or_default();
        let now = Utc::now();

        let mut canceled = 0;
        for id in ids.into_iter().filter(|id| *id != keep) {
            if let Some(appointment) = inner.appointments.get_mut(&id) {
                if appointment.clinic_id == clinic_id && !appointment.canceled {
                    appointment.canceled = true;
                    appointment.updated_at = now;
                    canceled += 1;
                }
            }
        }

        Ok(canceled)
    }

    async fn list(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let inner = self.inner.read().await;
        let mut appointments: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|appointment| appointment.clinic_id == clinic_id && query.matches(appointment))
            .cloned()
            .collect();

        appointments.sort_by_key(|appointment| appointment.start_time);
        Ok(appointments)
    }

    async fn find_package_with_deleted(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PatientPackage>, AppointmentError> {
        let inner = self.inner.read().await;
        Ok(inner
            .packages
            .get(&package_id)
            .filter(|package| package.clinic_id == clinic_id)
            .cloned())
    }

    async fn update_package_appointments(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
        update: &PackageUpdate,
    ) -> Result<usize, AppointmentError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let mut affected = 0;
        for appointment in inner.appointments.values_mut().filter(|appointment| {
            appointment.clinic_id == clinic_id
                && !appointment.canceled
                && appointment.patient_package_id == Some(package_id)
        }) {
            update.apply_to(appointment);
            appointment.updated_at = now;
            affected += 1;
        }

        Ok(affected)
    }

    async fn append_event_log(&self, log: &AppointmentEventLog) -> Result<(), AppointmentError> {
        let mut inner = self.inner.write().await;
        inner.event_logs.push(log.clone());
        Ok(())
    }

    async fn event_logs(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentEventLog>, AppointmentError> {
        let inner = self.inner.read().await;
        if inner.in_clinic(clinic_id, appointment_id).is_none() {
            return Err(AppointmentError::NotFound);
        }

        Ok(inner
            .event_logs
            .iter()
            .filter(|log| log.appointment_id == appointment_id)
            .cloned()
            .collect())
    }
}
