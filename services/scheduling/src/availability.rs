//! Calendar arithmetic: clinic days, occupancy windows, the slot grid.
//!
//! An appointment occupies `[start, start + max(duration, occupancy))`.
//! Two windows conflict when `a.start < b.end && a.end > b.start`.

use crate::config::ClinicConfig;
use crate::types::{Appointment, AppointmentId};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// Half-open time interval `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl Window {
    /// Window blocked by something starting at `start` for `duration_minutes`.
    #[must_use]
    pub fn occupied(start: DateTime<Utc>, duration_minutes: i32, clinic: &ClinicConfig) -> Self {
        let length = Duration::minutes(i64::from(duration_minutes)).max(clinic.occupancy);
        Self {
            start,
            end: start + length,
        }
    }

    /// Window blocked by an existing appointment.
    #[must_use]
    pub fn of(appointment: &Appointment, clinic: &ClinicConfig) -> Self {
        Self::occupied(appointment.scheduled_at, appointment.duration_minutes, clinic)
    }

    /// Whether the two windows share any instant
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Clinic-local calendar day of an instant.
#[must_use]
pub fn clinic_day(at: DateTime<Utc>, clinic: &ClinicConfig) -> NaiveDate {
    at.with_timezone(&clinic.utc_offset).date_naive()
}

/// UTC bounds `[start, end)` of a clinic-local day.
#[must_use]
pub fn day_bounds(date: NaiveDate, clinic: &ClinicConfig) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    let start = clinic
        .utc_offset
        .from_local_datetime(&midnight)
        .single()
        .map_or_else(|| midnight.and_utc(), |local| local.with_timezone(&Utc));
    (start, start + Duration::days(1))
}

/// First active appointment in `others` (other than `exclude`) that overlaps `candidate`.
pub fn find_conflict<'a>(
    candidate: &Window,
    others: impl IntoIterator<Item = &'a Appointment>,
    exclude: Option<AppointmentId>,
    clinic: &ClinicConfig,
) -> Option<&'a Appointment> {
    others.into_iter().find(|existing| {
        Some(existing.id) != exclude
            && existing.status.is_active()
            && candidate.overlaps(&Window::of(existing, clinic))
    })
}

/// One bookable start time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Clinic-local `HH:MM`
    pub time: String,
    /// The same instant in UTC
    pub starts_at: DateTime<Utc>,
}

/// Free slots of the grid on `date`, given that day's appointments.
///
/// The grid runs from opening time in steps of `slot_length`, with every
/// slot starting before closing time. A slot is free when its occupancy
/// window overlaps no active appointment.
#[must_use]
pub fn free_slots(date: NaiveDate, appointments: &[Appointment], clinic: &ClinicConfig) -> Vec<Slot> {
    let (midnight, _) = day_bounds(date, clinic);
    let opens = midnight + (clinic.opens_at - chrono::NaiveTime::MIN);
    let closes = midnight + (clinic.closes_at - chrono::NaiveTime::MIN);
    let step = clinic.slot_length.max(Duration::minutes(1));
    let minutes = i32::try_from(clinic.occupancy.num_minutes()).unwrap_or(i32::MAX);

    let mut slots = Vec::new();
    let mut start = opens;
    while start < closes {
        let window = Window::occupied(start, minutes, clinic);
        if find_conflict(&window, appointments, None, clinic).is_none() {
            slots.push(Slot {
                time: start.with_timezone(&clinic.utc_offset).format("%H:%M").to_string(),
                starts_at: start,
            });
        }
        start += step;
    }
    slots
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{AppointmentStatus, Category, ConsultationType, Priority};
    use chrono::FixedOffset;

    pub(crate) fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    pub(crate) fn appointment(id: i64, start: &str) -> Appointment {
        let scheduled_at = at(start);
        Appointment {
            id: AppointmentId(id),
            client_id: 10,
            practitioner_id: None,
            consultation_type: ConsultationType::General,
            category: Category::GeneralDentistry,
            scheduled_at,
            duration_minutes: 60,
            details: None,
            status: AppointmentStatus::Pending,
            priority: Priority::Medium,
            cancellation_reason: None,
            cancelled_at: None,
            previous_scheduled_at: None,
            reschedule_reason: None,
            rescheduled_at: None,
            observations: None,
            assigned_at: None,
            practitioner_notes: None,
            reminder_sent: false,
            reminder_sent_at: None,
            estimated_cost: None,
            created_at: at("2025-05-01T00:00:00Z"),
            updated_at: at("2025-05-01T00:00:00Z"),
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn windows_are_half_open() {
        let clinic = ClinicConfig::default();
        let nine = Window::occupied(at("2025-06-01T09:00:00Z"), 60, &clinic);
        let ten = Window::occupied(at("2025-06-01T10:00:00Z"), 60, &clinic);
        let half_past = Window::occupied(at("2025-06-01T09:30:00Z"), 60, &clinic);

        assert!(!nine.overlaps(&ten));
        assert!(nine.overlaps(&half_past));
        assert!(half_past.overlaps(&ten));
    }

    #[test]
    fn short_appointments_still_block_the_occupancy_window() {
        let clinic = ClinicConfig::default();
        let window = Window::occupied(at("2025-06-01T09:00:00Z"), 30, &clinic);
        assert_eq!(window.end, at("2025-06-01T10:00:00Z"));
    }

    #[test]
    fn grid_covers_opening_hours() {
        let clinic = ClinicConfig::default();
        let slots = free_slots(day("2025-06-01"), &[], &clinic);

        assert_eq!(slots.len(), 20);
        assert_eq!(slots[0].time, "08:00");
        assert_eq!(slots.last().unwrap().time, "17:30");
    }

    #[test]
    fn booked_hour_removes_three_slots() {
        let clinic = ClinicConfig::default();
        let booked = vec![appointment(1, "2025-06-01T09:00:00Z")];
        let times: Vec<String> = free_slots(day("2025-06-01"), &booked, &clinic)
            .into_iter()
            .map(|slot| slot.time)
            .collect();

        assert!(times.contains(&"08:00".to_string()));
        assert!(!times.contains(&"08:30".to_string()));
        assert!(!times.contains(&"09:00".to_string()));
        assert!(!times.contains(&"09:30".to_string()));
        assert!(times.contains(&"10:00".to_string()));
        assert_eq!(times.len(), 17);
    }

    #[test]
    fn cancelled_appointments_free_their_slot() {
        let clinic = ClinicConfig::default();
        let mut cancelled = appointment(1, "2025-06-01T09:00:00Z");
        cancelled.status = AppointmentStatus::Cancelled;
        assert_eq!(free_slots(day("2025-06-01"), &[cancelled], &clinic).len(), 20);
    }

    #[test]
    fn clinic_days_follow_the_offset() {
        let clinic = ClinicConfig {
            utc_offset: FixedOffset::west_opt(5 * 3600).unwrap(),
            ..ClinicConfig::default()
        };
        // 02:00 UTC is 21:00 the previous evening at UTC-5.
        assert_eq!(clinic_day(at("2025-06-02T02:00:00Z"), &clinic), day("2025-06-01"));

        let (start, end) = day_bounds(day("2025-06-01"), &clinic);
        assert_eq!(start, at("2025-06-01T05:00:00Z"));
        assert_eq!(end, at("2025-06-02T05:00:00Z"));

        let slots = free_slots(day("2025-06-01"), &[], &clinic);
        assert_eq!(slots[0].starts_at, at("2025-06-01T13:00:00Z"));
        assert_eq!(slots[0].time, "08:00");
    }
}
