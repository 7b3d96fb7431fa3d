pub mod billing;
pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod locks;
pub mod notification;
pub mod package;
pub mod recurrence;
pub mod settings;
pub mod store;
pub mod supabase_store;

pub use billing::{Billable, FinancialRecordLedger, FinancialRecordLine, InMemoryFinancialRecordLedger};
pub use booking::{AppointmentBookingService, ChangeSet, LifecycleOutcome};
pub use conflict::ConflictDetectionService;
pub use lifecycle::{SideEffect, Transition};
pub use locks::DoctorScheduleLocks;
pub use notification::{
    LoggingNotificationDispatcher, LoggingQueueBroadcaster, Notification, NotificationDispatcher,
    NotificationKind, QueueBroadcast, QueueBroadcaster, Recipient,
};
pub use package::{CascadeOutcome, PackageCascadeService, PackageChange, SkipReason};
pub use recurrence::{RecurrenceCoordinator, RecurrenceEngine, RecurrencePlan, StoreRecurrenceEngine};
pub use settings::{ClinicSettingsProvider, InMemoryClinicSettings, StaticClinicSettings};
pub use store::{AppointmentStore, InMemoryAppointmentStore, PackageUpdate};
pub use supabase_store::SupabaseAppointmentStore;
