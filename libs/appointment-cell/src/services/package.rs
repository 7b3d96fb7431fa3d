use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentStatus, PatientPackage};
use crate::services::store::{AppointmentStore, PackageUpdate};

/// Status change mirrored onto every appointment of a patient package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageChange {
    Assistance(bool),
    Canceled(bool),
    Billed,
}

impl PackageChange {
    pub fn to_update(self) -> PackageUpdate {
        match self {
            PackageChange::Assistance(assisted) => PackageUpdate {
                assisted: Some(assisted),
                status: Some(if assisted {
                    AppointmentStatus::Confirmed
                } else {
                    AppointmentStatus::JustCreated
                }),
                canceled: None,
            },
            PackageChange::Canceled(canceled) => PackageUpdate {
                canceled: Some(canceled),
                ..Default::default()
            },
            PackageChange::Billed => PackageUpdate {
                status: Some(AppointmentStatus::Billed),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotInPackage,
    PackageMissing,
    PackageDeleted,
}

/// Result of a package cascade. A skip is a defined outcome, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CascadeOutcome {
    Applied { affected: usize },
    Skipped { reason: SkipReason },
}

impl CascadeOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CascadeOutcome::Skipped { .. })
    }
}

pub struct PackageCascadeService {
    store: Arc<dyn AppointmentStore>,
}

impl PackageCascadeService {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    /// The appointment's package, provided it has not been soft-deleted.
    pub async fn live_package(
        &self,
        appointment: &Appointment,
    ) -> Result<Result<PatientPackage, SkipReason>, AppointmentError> {
        let Some(package_id) = appointment.patient_package_id else {
            return Ok(Err(SkipReason::NotInPackage));
        };

        let package = self
            .store
            .find_package_with_deleted(appointment.clinic_id, package_id)
            .await?;

        Ok(match package {
            None => Err(SkipReason::PackageMissing),
            Some(package) if package.is_deleted() => Err(SkipReason::PackageDeleted),
            Some(package) => Ok(package),
        })
    }

    pub async fn belongs_to_live_package(&self, appointment: &Appointment) -> Result<bool, AppointmentError> {
        Ok(self.live_package(appointment).await?.is_ok())
    }

    /// Mirror `change` onto every active appointment sharing the package.
    pub async fn propagate(
        &self,
        appointment: &Appointment,
        change: PackageChange,
    ) -> Result<CascadeOutcome, AppointmentError> {
        let package = match self.live_package(appointment).await? {
            Ok(package) => package,
            Err(reason) => {
                debug!(
                    "Package cascade {:?} skipped for appointment {}: {:?}",
                    change, appointment.id, reason
                );
                return Ok(CascadeOutcome::Skipped { reason });
            }
        };

        let affected = self
            .store
            .update_package_appointments(appointment.clinic_id, package.id, &change.to_update())
            .await?;

        info!(
            "Package {} cascade {:?} applied to {} appointments",
            package.id, change, affected
        );
        Ok(CascadeOutcome::Applied { affected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistance_moves_status_with_flag() {
        let on = PackageChange::Assistance(true).to_update();
        assert_eq!(on.assisted, Some(true));
        assert_eq!(on.status, Some(AppointmentStatus::Confirmed));

        let off = PackageChange::Assistance(false).to_update();
        assert_eq!(off.status, Some(AppointmentStatus::JustCreated));
        assert_eq!(off.canceled, None);
    }

    #[test]
    fn test_billed_and_canceled_touch_one_column() {
        assert_eq!(
            PackageChange::Billed.to_update(),
            PackageUpdate {
                status: Some(AppointmentStatus::Billed),
                ..Default::default()
            }
        );
        assert_eq!(
            PackageChange::Canceled(true).to_update(),
            PackageUpdate {
                canceled: Some(true),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let skipped = CascadeOutcome::Skipped { reason: SkipReason::PackageDeleted };
        assert!(skipped.is_skipped());
        assert_eq!(
            serde_json::to_value(skipped).unwrap(),
            serde_json::json!({ "outcome": "skipped", "reason": "package_deleted" })
        );
    }
}
