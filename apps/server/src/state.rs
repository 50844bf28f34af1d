//! Shared application state handed to every handler

use std::sync::Arc;

use crate::{
    api::middleware::RateLimiter,
    auth::TokenService,
    config::Config,
    db::{self, DynStore},
    realtime::RealtimeHub,
    services::{
        AccountService, AdminService, AppointmentService, BillingService, ClinicService,
        DoctorService, MetricsService, PatientService, QueueService,
    },
    Result,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: DynStore,
    pub hub: RealtimeHub,
    pub tokens: TokenService,
    pub queue: QueueService,
    pub appointments: AppointmentService,
    pub doctors: DoctorService,
    pub patients: PatientService,
    pub clinics: ClinicService,
    pub accounts: AccountService,
    pub billing: BillingService,
    pub admin: AdminService,
    pub metrics_service: MetricsService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Connect the configured store and wire up the services.
    pub async fn new(config: Config) -> Result<Self> {
        let store = db::connect(&config.database).await?;
        Ok(Self::with_store(config, store))
    }

    /// Build the state over an existing store (tests use the in-memory one).
    pub fn with_store(config: Config, store: DynStore) -> Self {
        let hub = RealtimeHub::new(config.realtime.channel_capacity);
        let tokens = TokenService::new(&config.auth);
        let clinics = ClinicService::new(store.clone(), config.server.public_base_url.clone());

        Self {
            queue: QueueService::new(
                store.clone(),
                hub.clone(),
                config.queue.ordering_policy,
                config.queue.default_avg_consultation_minutes,
            ),
            appointments: AppointmentService::new(store.clone(), hub.clone()),
            doctors: DoctorService::new(store.clone(), hub.clone()),
            patients: PatientService::new(store.clone()),
            admin: AdminService::new(store.clone(), clinics.clone()),
            clinics,
            accounts: AccountService::new(store.clone(), tokens.clone()),
            billing: BillingService::new(store.clone(), config.billing.webhook_secret.clone()),
            metrics_service: MetricsService::new(store.clone()),
            rate_limiter: RateLimiter::new(&config.rate_limit),
            tokens,
            hub,
            store,
            config: Arc::new(config),
        }
    }
}
