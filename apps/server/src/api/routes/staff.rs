//! Routes for authenticated clinic staff
//!
//! Mounted behind `auth_middleware`; handlers scope every call to the
//! caller's clinic.

use crate::api::handlers::{accounts, appointments, clinic, doctors, patients, queue};
use crate::state::AppState;
use axum::{
    routing::{get, patch, post},
    Router,
};

pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/me", get(accounts::me))
        // Clinic
        .route(
            "/api/clinic",
            get(clinic::get_clinic).patch(clinic::update_clinic),
        )
        .route("/api/clinic/check-in-link", get(clinic::check_in_link))
        .route(
            "/api/clinic/staff",
            get(clinic::list_staff).post(clinic::invite_staff),
        )
        // Queue
        .route("/api/queue", get(queue::list_queue).post(queue::check_in))
        .route("/api/queue/stats", get(queue::stats))
        .route("/api/queue/call-next", post(queue::call_next))
        .route(
            "/api/queue/:id",
            get(queue::get_entry).delete(queue::remove_entry),
        )
        .route("/api/queue/:id/status", patch(queue::update_status))
        .route("/api/queue/:id/position", patch(queue::reorder))
        // Doctors
        .route(
            "/api/doctors",
            get(doctors::list_doctors).post(doctors::create_doctor),
        )
        .route(
            "/api/doctors/:id",
            patch(doctors::update_doctor).delete(doctors::delete_doctor),
        )
        .route("/api/doctors/:id/presence", patch(doctors::set_presence))
        // Patients
        .route(
            "/api/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/api/patients/:id",
            get(patients::get_patient).patch(patients::update_patient),
        )
        // Appointments
        .route(
            "/api/appointments",
            get(appointments::list_appointments).post(appointments::book_appointment),
        )
        .route("/api/appointments/slots", get(appointments::available_slots))
        .route(
            "/api/appointments/:id",
            get(appointments::get_appointment)
                .patch(appointments::reschedule_appointment)
                .delete(appointments::cancel_appointment),
        )
        .route(
            "/api/appointments/:id/status",
            patch(appointments::update_appointment_status),
        )
}
