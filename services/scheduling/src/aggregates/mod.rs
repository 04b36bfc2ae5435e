//! Aggregates for the scheduling service.
//!
//! - [`appointment`]: booking, assignment, rescheduling, cancellation,
//!   status changes, reminders and no-shows

pub mod appointment;

pub use appointment::{
    AppointmentAction, AppointmentEnvironment, AppointmentReducer, BookingRejection, BookingState,
    NewAppointment,
};
