// libs/appointment-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentEventLog, AppointmentQuery, PatientPackage};
use crate::services::store::{AppointmentStore, PackageUpdate};

const APPOINTMENTS: &str = "/rest/v1/appointments";
const PATIENT_PACKAGES: &str = "/rest/v1/patient_packages";
const EVENT_LOGS: &str = "/rest/v1/appointment_event_logs";

fn encode_time(time: DateTime<Utc>) -> String {
    urlencoding::encode(&time.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| AppointmentError::Database(format!("Failed to parse rows: {}", e)))
}

fn database_error(e: anyhow::Error) -> AppointmentError {
    AppointmentError::Database(e.to_string())
}

/// PostgREST-backed store. Bulk changes are single PATCH statements, which
/// PostgREST runs in one transaction.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(database_error)?;
        parse_rows(rows)
    }

    async fn patch(&self, path: &str, body: Value) -> Result<usize, AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::PATCH, path, Some(body))
            .await
            .map_err(database_error)?;
        Ok(rows.len())
    }

    async fn find_where(&self, filters: &[String]) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("{}?{}&limit=1", APPOINTMENTS, filters.join("&"));
        Ok(self.select::<Appointment>(&path).await?.into_iter().next())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::POST, APPOINTMENTS, Some(json!(appointment)))
            .await
            .map_err(database_error)?;

        if rows.is_empty() {
            return Err(AppointmentError::Database("Failed to create appointment".to_string()));
        }
        Ok(())
    }

    async fn insert_many(&self, appointments: &[Appointment]) -> Result<usize, AppointmentError> {
        if appointments.is_empty() {
            return Ok(0);
        }

        let rows: Vec<Value> = self
            .supabase
            .request(Method::POST, APPOINTMENTS, Some(json!(appointments)))
            .await
            .map_err(database_error)?;

        info!("Inserted {} appointments", rows.len());
        Ok(rows.len())
    }

    async fn update(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let path = format!(
            "{}?id=eq.{}&clinic_id=eq.{}",
            APPOINTMENTS, appointment.id, appointment.clinic_id
        );
        match self.patch(&path, json!(appointment)).await? {
            0 => Err(AppointmentError::NotFound),
            _ => Ok(()),
        }
    }

    async fn find(&self, clinic_id: Uuid, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.find_where(&[
            format!("id=eq.{}", id),
            format!("clinic_id=eq.{}", clinic_id),
            "canceled=eq.false".to_string(),
        ])
        .await
    }

    async fn find_with_canceled(
        &self,
        clinic_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.find_where(&[format!("id=eq.{}", id), format!("clinic_id=eq.{}", clinic_id)])
            .await
    }

    async fn doctor_appointments_at(
        &self,
        clinic_id: Uuid,
        doctor_id: Uuid,
        instant: DateTime<Utc>,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("clinic_id=eq.{}", clinic_id),
            format!("doctor_id=eq.{}", doctor_id),
            "canceled=eq.false".to_string(),
            format!("start_time=lte.{}", encode_time(instant)),
            format!("end_time=gt.{}", encode_time(instant)),
        ];
        if let Some(exclude_id) = exclude_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("{}?{}&order=start_time.asc", APPOINTMENTS, query_parts.join("&"));
        self.select(&path).await
    }

    async fn series_members(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "{}?clinic_id=eq.{}&series_id=eq.{}&canceled=eq.false&order=start_time.asc",
            APPOINTMENTS, clinic_id, series_id
        );
        self.select(&path).await
    }

    async fn cancel_series(
        &self,
        clinic_id: Uuid,
        series_id: Uuid,
        keep: Uuid,
    ) -> Result<usize, AppointmentError> {
        let path = format!(
            "{}?clinic_id=eq.{}&series_id=eq.{}&id=neq.{}&canceled=eq.false",
            APPOINTMENTS, clinic_id, series_id, keep
        );
        let canceled = self
            .patch(&path, json!({ "canceled": true, "updated_at": Utc::now() }))
            .await?;

        debug!("Canceled {} members of series {}", canceled, series_id);
        Ok(canceled)
    }

    async fn list(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![format!("clinic_id=eq.{}", clinic_id)];

        if !query.include_canceled {
            query_parts.push("canceled=eq.false".to_string());
        }
        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }

        match (query.from, query.to) {
            (Some(from), Some(to)) => {
                let (from, to) = (encode_time(from), encode_time(to));
                query_parts.push(format!(
                    "or=(and(start_time.gte.{from},start_time.lte.{to}),\
                     and(end_time.gte.{from},end_time.lte.{to}),\
                     and(start_time.lt.{from},end_time.gt.{to}))"
                ));
            }
            (Some(from), None) => query_parts.push(format!("start_time=gte.{}", encode_time(from))),
            (None, Some(to)) => query_parts.push(format!("start_time=lte.{}", encode_time(to))),
            (None, None) => {}
        }

        let path = format!("{}?{}&order=start_time.asc", APPOINTMENTS, query_parts.join("&"));
        self.select(&path).await
    }

    async fn find_package_with_deleted(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
    ) -> Result<Option<PatientPackage>, AppointmentError> {
        let path = format!(
            "{}?id=eq.{}&clinic_id=eq.{}&limit=1",
            PATIENT_PACKAGES, package_id, clinic_id
        );
        Ok(self.select::<PatientPackage>(&path).await?.into_iter().next())
    }

    async fn update_package_appointments(
        &self,
        clinic_id: Uuid,
        package_id: Uuid,
        update: &PackageUpdate,
    ) -> Result<usize, AppointmentError> {
        if update.is_empty() {
            return Ok(0);
        }

        let mut body = Map::new();
        if let Some(assisted) = update.assisted {
            body.insert("assisted".to_string(), json!(assisted));
        }
        if let Some(status) = update.status {
            body.insert("status".to_string(), json!(status));
        }
        if let Some(canceled) = update.canceled {
            body.insert("canceled".to_string(), json!(canceled));
        }
        body.insert("updated_at".to_string(), json!(Utc::now()));

        let path = format!(
            "{}?clinic_id=eq.{}&patient_package_id=eq.{}&canceled=eq.false",
            APPOINTMENTS, clinic_id, package_id
        );
        self.patch(&path, Value::Object(body)).await
    }

    async fn append_event_log(&self, log: &AppointmentEventLog) -> Result<(), AppointmentError> {
        let _: Vec<Value> = self
            .supabase
            .request(Method::POST, EVENT_LOGS, Some(json!(log)))
            .await
            .map_err(database_error)?;
        Ok(())
    }

    async fn event_logs(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentEventLog>, AppointmentError> {
        if self.find_with_canceled(clinic_id, appointment_id).await?.is_none() {
            return Err(AppointmentError::NotFound);
        }

        let path = format!(
            "{}?appointment_id=eq.{}&order=created_at.asc",
            EVENT_LOGS, appointment_id
        );
        self.select(&path).await
    }
}
