//! Domain types for the scheduling service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an appointment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub i64);

impl AppointmentId {
    /// Wraps a raw database id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw database id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value that did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    /// What was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Appointment Status
// ============================================================================

/// Lifecycle state of an appointment
///
/// ```text
/// pending ──► confirmed ──► in_progress ──► completed
///    │            │
///    ├────────────┴──► cancelled
///    └────────────┴──► no_show
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Booked, no practitioner yet
    Pending,
    /// Practitioner assigned
    Confirmed,
    /// Consultation under way
    InProgress,
    /// Consultation finished
    Completed,
    /// Cancelled by the client or staff
    Cancelled,
    /// Client never showed up
    NoShow,
}

impl AppointmentStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Confirmed,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::NoShow,
    ];

    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    /// Pending or confirmed: occupies its slot, can be rescheduled or cancelled
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    /// No transition leaves this state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    /// Whether the transition table allows `self → next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Cancelled | Self::NoShow)
                | (Self::Confirmed, Self::InProgress | Self::Cancelled | Self::NoShow)
                | (Self::InProgress, Self::Completed)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

// ============================================================================
// Consultation Type & Category
// ============================================================================

/// Kind of consultation requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationType {
    /// First visit or check-up
    General,
    /// Follow-up treatment
    Control,
    /// Emergency
    Urgent,
}

impl ConsultationType {
    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Control => "control",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for ConsultationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsultationType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "control" => Ok(Self::Control),
            "urgent" => Ok(Self::Urgent),
            _ => Err(ParseEnumError::new("consultation type", s)),
        }
    }
}

/// Treatment category; each belongs to exactly one consultation type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// general
    GeneralDentistry,
    /// general
    SpecialtyDiagnosis,
    /// control
    Orthodontics,
    /// control
    Endodontics,
    /// control
    OralSurgery,
    /// control
    Prosthodontics,
    /// control
    Periodontics,
    /// urgent
    UrgentOralSurgery,
    /// urgent
    UrgentEndodontics,
    /// urgent
    Rehabilitation,
    /// urgent
    DentalTrauma,
}

impl Category {
    /// Every category
    pub const ALL: [Self; 11] = [
        Self::GeneralDentistry,
        Self::SpecialtyDiagnosis,
        Self::Orthodontics,
        Self::Endodontics,
        Self::OralSurgery,
        Self::Prosthodontics,
        Self::Periodontics,
        Self::UrgentOralSurgery,
        Self::UrgentEndodontics,
        Self::Rehabilitation,
        Self::DentalTrauma,
    ];

    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeneralDentistry => "general_dentistry",
            Self::SpecialtyDiagnosis => "specialty_diagnosis",
            Self::Orthodontics => "orthodontics",
            Self::Endodontics => "endodontics",
            Self::OralSurgery => "oral_surgery",
            Self::Prosthodontics => "prosthodontics",
            Self::Periodontics => "periodontics",
            Self::UrgentOralSurgery => "urgent_oral_surgery",
            Self::UrgentEndodontics => "urgent_endodontics",
            Self::Rehabilitation => "rehabilitation",
            Self::DentalTrauma => "dental_trauma",
        }
    }

    /// The consultation type this category is offered under
    #[must_use]
    pub const fn consultation_type(self) -> ConsultationType {
        match self {
            Self::GeneralDentistry | Self::SpecialtyDiagnosis => ConsultationType::General,
            Self::Orthodontics
            | Self::Endodontics
            | Self::OralSurgery
            | Self::Prosthodontics
            | Self::Periodontics => ConsultationType::Control,
            Self::UrgentOralSurgery
            | Self::UrgentEndodontics
            | Self::Rehabilitation
            | Self::DentalTrauma => ConsultationType::Urgent,
        }
    }

    /// Whether this category may be booked under `kind`
    #[must_use]
    pub fn is_allowed_for(self, kind: ConsultationType) -> bool {
        self.consultation_type() == kind
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Triage priority
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Can wait
    Low,
    /// Normal
    #[default]
    Medium,
    /// Should be seen soon
    High,
    /// See immediately
    Urgent,
}

impl Priority {
    /// Wire and storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(ParseEnumError::new("priority", s)),
        }
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in cents.
///
/// Serialized as a decimal string with two places (`"150.00"`); accepts
/// either a string or a JSON number on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    /// Creates money from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Amount in cents
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEnumError::new("amount", s);
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction))
            .ok_or_else(invalid)?;
        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(number) => number.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Appointment
// ============================================================================

/// A booked consultation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    /// Appointment ID
    pub id: AppointmentId,
    /// Client who owns the booking
    pub client_id: i64,
    /// Assigned practitioner, once confirmed
    pub practitioner_id: Option<i64>,
    /// Consultation type
    pub consultation_type: ConsultationType,
    /// Treatment category
    pub category: Category,
    /// Start time
    pub scheduled_at: DateTime<Utc>,
    /// Length in minutes
    pub duration_minutes: i32,
    /// Free text from the client
    pub details: Option<String>,
    /// Lifecycle state
    pub status: AppointmentStatus,
    /// Triage priority
    pub priority: Priority,
    /// Why it was cancelled
    pub cancellation_reason: Option<String>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Start time before the last reschedule
    pub previous_scheduled_at: Option<DateTime<Utc>>,
    /// Why it was rescheduled
    pub reschedule_reason: Option<String>,
    /// When it was last rescheduled
    pub rescheduled_at: Option<DateTime<Utc>>,
    /// Front-desk notes taken at assignment
    pub observations: Option<String>,
    /// When the practitioner was assigned
    pub assigned_at: Option<DateTime<Utc>>,
    /// Practitioner notes
    pub practitioner_notes: Option<String>,
    /// Whether the 24h reminder went out for the current slot
    pub reminder_sent: bool,
    /// When the 24h reminder went out
    pub reminder_sent_at: Option<DateTime<Utc>>,
    /// Estimated cost
    pub estimated_cost: Option<Money>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last modified at
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// End of the booked duration
    #[must_use]
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Which reminder a sweep is sending
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderWindow {
    /// Day-before reminder; sent once per slot
    #[serde(rename = "24h")]
    DayBefore,
    /// Two hours out; sent on every sweep inside the window
    #[serde(rename = "2h")]
    Imminent,
}

impl ReminderWindow {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DayBefore => "24h",
            Self::Imminent => "2h",
        }
    }

    /// How far ahead of the appointment the window opens
    #[must_use]
    pub const fn lead(self) -> Duration {
        match self {
            Self::DayBefore => Duration::hours(24),
            Self::Imminent => Duration::hours(2),
        }
    }
}

/// One page of results
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Pagination block
    pub pagination: Pagination,
}

/// Pagination metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number
    pub current_page: u32,
    /// Number of pages
    pub total_pages: u32,
    /// Matching items across all pages
    pub total_items: u64,
    /// Page size
    pub items_per_page: u32,
}

impl Pagination {
    /// Build the block for `total` items split into pages of `limit`
    #[must_use]
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let limit = limit.max(1);
        Self {
            current_page: page.max(1),
            total_pages: u32::try_from(total.div_ceil(u64::from(limit))).unwrap_or(u32::MAX),
            total_items: total,
            items_per_page: limit,
        }
    }
}
