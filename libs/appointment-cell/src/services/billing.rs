use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppointmentError;

/// What a financial record line charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Billable {
    PatientPackage(Uuid),
    AppointmentType(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialRecordLine {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub billable: Billable,
    pub appointment_ids: Vec<Uuid>,
}

/// Patient financial records. Appointment-type lines are shared per doctor,
/// package lines per package.
#[async_trait]
pub trait FinancialRecordLedger: Send + Sync {
    async fn record_appointment(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        billable: Billable,
        appointment_id: Uuid,
    ) -> Result<FinancialRecordLine, AppointmentError>;

    async fn lines_for_patient(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Vec<FinancialRecordLine>, AppointmentError>;
}

#[derive(Default)]
pub struct InMemoryFinancialRecordLedger {
    lines: RwLock<Vec<FinancialRecordLine>>,
}

impl InMemoryFinancialRecordLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FinancialRecordLedger for InMemoryFinancialRecordLedger {
    async fn record_appointment(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        doctor_id: Uuid,
        billable: Billable,
        appointment_id: Uuid,
    ) -> Result<FinancialRecordLine, AppointmentError> {
        let mut lines = self.lines.write().await;

        let position = lines.iter().position(|line| {
            line.clinic_id == clinic_id
                && line.patient_id == patient_id
                && line.billable == billable
                // package lines are shared across doctors
                && (matches!(billable, Billable::PatientPackage(_)) || line.doctor_id == doctor_id)
        });

        let index = match position {
            Some(index) => index,
            None => {
                debug!("Opening financial record line for patient {} ({:?})", patient_id, billable);
                lines.push(FinancialRecordLine {
                    id: Uuid::new_v4(),
                    clinic_id,
                    patient_id,
                    doctor_id,
                    billable,
                    appointment_ids: Vec::new(),
                });
                lines.len() - 1
            }
        };

        let line = &mut lines[index];
        if !line.appointment_ids.contains(&appointment_id) {
            line.appointment_ids.push(appointment_id);
        }
        Ok(line.clone())
    }

    async fn lines_for_patient(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Vec<FinancialRecordLine>, AppointmentError> {
        let lines = self.lines.read().await;
        Ok(lines
            .iter()
            .filter(|line| line.clinic_id == clinic_id && line.patient_id == patient_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appointment_type_lines_are_per_doctor() {
        let ledger = InMemoryFinancialRecordLedger::new();
        let (clinic, patient, kind) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let billable = Billable::AppointmentType(kind);

        ledger.record_appointment(clinic, patient, Uuid::new_v4(), billable, Uuid::new_v4()).await.unwrap();
        ledger.record_appointment(clinic, patient, Uuid::new_v4(), billable, Uuid::new_v4()).await.unwrap();

        assert_eq!(ledger.lines_for_patient(clinic, patient).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_package_line_is_shared_and_idempotent() {
        let ledger = InMemoryFinancialRecordLedger::new();
        let (clinic, patient) = (Uuid::new_v4(), Uuid::new_v4());
        let billable = Billable::PatientPackage(Uuid::new_v4());
        let appointment = Uuid::new_v4();

        ledger.record_appointment(clinic, patient, Uuid::new_v4(), billable, appointment).await.unwrap();
        let line = ledger
            .record_appointment(clinic, patient, Uuid::new_v4(), billable, appointment)
            .await
            .unwrap();

        assert_eq!(line.appointment_ids, vec![appointment]);
        assert_eq!(ledger.lines_for_patient(clinic, patient).await.unwrap().len(), 1);
        assert!(ledger.lines_for_patient(Uuid::new_v4(), patient).await.unwrap().is_empty());
    }
}
