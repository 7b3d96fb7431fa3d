// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tracing::info;

use shared_config::{AppConfig, StoreBackend};
use shared_database::supabase::SupabaseClient;

use crate::handlers;
use crate::services::booking::AppointmentBookingService;
use crate::services::settings::StaticClinicSettings;
use crate::services::store::{AppointmentStore, InMemoryAppointmentStore};
use crate::services::supabase_store::SupabaseAppointmentStore;

pub struct AppointmentCellState {
    pub booking: AppointmentBookingService,
}

impl AppointmentCellState {
    pub fn new(booking: AppointmentBookingService) -> Self {
        Self { booking }
    }

    /// Wire the cell against the store backend named in the configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let store: Arc<dyn AppointmentStore> = match config.store_backend {
            StoreBackend::Supabase => {
                info!("Using Supabase appointment store at {}", config.supabase_url);
                Arc::new(SupabaseAppointmentStore::new(Arc::new(SupabaseClient::new(config))))
            }
            StoreBackend::Memory => {
                info!("Using in-memory appointment store");
                Arc::new(InMemoryAppointmentStore::new())
            }
        };
        let settings = Arc::new(StaticClinicSettings::new(config.clinic_defaults.clone()));

        Self::new(AppointmentBookingService::new(store, settings))
    }
}

/// Routes relative to `/clinics/{clinic_id}/appointments`.
pub fn appointment_routes(state: Arc<AppointmentCellState>) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment).get(handlers::list_appointments))
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment).put(handlers::update_appointment),
        )
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/events/{event}", post(handlers::fire_lifecycle_event))
        .route("/{appointment_id}/confirm", get(handlers::confirm_by_link))
        .route("/{appointment_id}/event-logs", get(handlers::get_event_logs))
        .with_state(state)
}
