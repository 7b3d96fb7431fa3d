use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCanceled,
    AppointmentCompleted,
    VisitRecordDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Patient(Uuid),
    Doctor(Uuid),
    ReferencingDoctor(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub recipient: Recipient,
}

/// Mail and in-app notification delivery. Callers do not retry.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Reception-queue screens that follow patients through the clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueBroadcast {
    HidePatient { doctor_id: Uuid, appointment_id: Uuid },
    NewPatient { doctor_id: Uuid, appointment_id: Uuid },
    PickNextPatient { doctor_id: Uuid },
}

#[async_trait]
pub trait QueueBroadcaster: Send + Sync {
    async fn broadcast(&self, clinic_id: Uuid, broadcast: QueueBroadcast) -> anyhow::Result<()>;
}

/// Writes every notification to the tracing pipeline.
#[derive(Debug, Default)]
pub struct LoggingNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingNotificationDispatcher {
    async fn dispatch(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            clinic_id = %notification.clinic_id,
            appointment_id = %notification.appointment_id,
            "notification {:?} to {:?}",
            notification.kind,
            notification.recipient
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingQueueBroadcaster;

#[async_trait]
impl QueueBroadcaster for LoggingQueueBroadcaster {
    async fn broadcast(&self, clinic_id: Uuid, broadcast: QueueBroadcast) -> anyhow::Result<()> {
        info!(clinic_id = %clinic_id, "queue broadcast {:?}", broadcast);
        Ok(())
    }
}
