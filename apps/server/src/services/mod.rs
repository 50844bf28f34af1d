//! Business logic layer
//!
//! Services own the transaction boundaries and publish realtime events after
//! commits; HTTP handlers stay thin.

pub mod accounts;
pub mod admin;
pub mod appointment;
pub mod billing;
pub mod clinic;
pub mod doctor;
pub mod metrics;
pub mod patient;
pub mod queue;

pub use accounts::AccountService;
pub use admin::AdminService;
pub use appointment::AppointmentService;
pub use billing::BillingService;
pub use clinic::ClinicService;
pub use doctor::DoctorService;
pub use metrics::MetricsService;
pub use patient::PatientService;
pub use queue::QueueService;
