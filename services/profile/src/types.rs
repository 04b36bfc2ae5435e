//! Profile domain types.
//!
//! A [`Profile`] is this service's copy of a user. Identity owns the id,
//! email, role and active flag; everything else is edited here. The JSON
//! shape is a superset of what the scheduling service reads from
//! `GET /api/users/{id}`.

use chrono::{DateTime, NaiveDate, Utc};
use dentalbook_auth::Role;
use serde::{Deserialize, Serialize};

/// A replicated user with its profile fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Global user id, minted by the identity service
    pub id: i64,
    /// Unique email
    pub email: String,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Role
    pub role: Role,
    /// Soft-delete flag
    pub active: bool,
    /// Client has supplied national id, birth date, phone and address
    pub profile_complete: bool,
    /// National id document number (unique)
    pub national_id: Option<String>,
    /// Birth date
    pub birth_date: Option<NaiveDate>,
    /// Mobile phone
    pub phone: Option<String>,
    /// Postal address
    pub address: Option<String>,
    /// Last successful login reported by identity
    pub last_login: Option<DateTime<Utc>>,
    /// Practitioner licence number
    pub license_number: Option<String>,
    /// Practitioner specialty
    pub specialty: Option<String>,
    /// Practitioner years of experience
    pub years_experience: Option<i32>,
    /// Front-desk shift
    pub shift: Option<String>,
    /// Front-desk hire date
    pub hire_date: Option<NaiveDate>,
    /// Created here
    pub created_at: DateTime<Utc>,
    /// Last change here
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A fresh replica of `record`, stamped `now`.
    #[must_use]
    pub fn from_record(record: UserRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            email: record.email,
            name: record.name,
            surname: record.surname,
            role: record.role,
            active: record.active,
            profile_complete: record.profile_complete,
            national_id: None,
            birth_date: None,
            phone: None,
            address: None,
            last_login: None,
            license_number: None,
            specialty: None,
            years_experience: None,
            shift: None,
            hire_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The identity-owned part of a user, as carried by `USER_CREATED`, the
/// identity service's internal listing and `create-with-id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Global user id
    pub id: i64,
    /// Email
    pub email: String,
    /// Given name
    pub name: String,
    /// Family name
    pub surname: String,
    /// Role
    #[serde(default = "default_role")]
    pub role: Role,
    /// Active flag
    #[serde(default = "default_true")]
    pub active: bool,
    /// Profile-complete flag
    #[serde(default)]
    pub profile_complete: bool,
}

const fn default_role() -> Role {
    Role::Client
}

const fn default_true() -> bool {
    true
}

/// Field-level changes carried by a replicated `USER_UPDATED`.
///
/// Absent fields are left alone. Other payload keys (`updatedAt`) are
/// ignored: the sender's clock is not comparable with the replica's.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedChanges {
    /// Which user changed
    pub id: i64,
    /// New email
    pub email: Option<String>,
    /// Given name
    pub name: Option<String>,
    /// Family name
    pub surname: Option<String>,
    /// Role
    pub role: Option<Role>,
    /// Active flag
    pub active: Option<bool>,
    /// Profile-complete flag
    pub profile_complete: Option<bool>,
    /// National id
    pub national_id: Option<String>,
    /// Birth date
    pub birth_date: Option<NaiveDate>,
    /// Mobile phone
    pub phone: Option<String>,
    /// Postal address
    pub address: Option<String>,
    /// Licence number
    pub license_number: Option<String>,
    /// Specialty
    pub specialty: Option<String>,
    /// Years of experience
    pub years_experience: Option<i32>,
    /// Front-desk shift
    pub shift: Option<String>,
    /// Hire date
    pub hire_date: Option<NaiveDate>,
}

/// Body of `PUT /api/users/{id}`.
///
/// Identity-owned fields (id, email, password, role, active) are not part
/// of the shape and are silently ignored if sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    /// Given name
    pub name: Option<String>,
    /// Family name
    pub surname: Option<String>,
    /// National id
    pub national_id: Option<String>,
    /// Birth date
    pub birth_date: Option<NaiveDate>,
    /// Mobile phone
    pub phone: Option<String>,
    /// Postal address
    pub address: Option<String>,
    /// Licence number
    pub license_number: Option<String>,
    /// Specialty
    pub specialty: Option<String>,
    /// Years of experience
    pub years_experience: Option<i32>,
    /// Front-desk shift
    pub shift: Option<String>,
    /// Hire date
    pub hire_date: Option<NaiveDate>,
}

/// Body of `POST /api/users/{id}/complete-profile`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCompletion {
    /// 8 to 20 characters, unique
    pub national_id: String,
    /// Birth date
    pub birth_date: NaiveDate,
    /// 8 to 15 characters
    pub phone: String,
    /// Postal address
    pub address: String,
}

/// Listing criteria; `None` fields do not filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProfileFilter {
    /// Only this role
    pub role: Option<Role>,
    /// Only active or inactive
    pub active: Option<bool>,
    /// Only complete or incomplete profiles
    pub profile_complete: Option<bool>,
    /// Case-insensitive substring of name, surname, email or national id
    pub search: Option<String>,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub limit: u32,
}

impl Default for ProfileFilter {
    fn default() -> Self {
        Self {
            role: None,
            active: None,
            profile_complete: None,
            search: None,
            page: 1,
            limit: 10,
        }
    }
}

impl ProfileFilter {
    /// Rows to skip for the requested page
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit.max(1))
    }

    pub(crate) fn matches(&self, profile: &Profile) -> bool {
        self.role.is_none_or(|role| profile.role == role)
            && self.active.is_none_or(|active| profile.active == active)
            && self
                .profile_complete
                .is_none_or(|complete| profile.profile_complete == complete)
            && self.search.as_deref().is_none_or(|needle| {
                let needle = needle.to_lowercase();
                [
                    Some(profile.name.as_str()),
                    Some(profile.surname.as_str()),
                    Some(profile.email.as_str()),
                    profile.national_id.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle))
            })
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

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    pub(crate) fn record(id: i64, role: Role) -> UserRecord {
        UserRecord {
            id,
            email: format!("user{id}@example.com"),
            name: "Ana".to_string(),
            surname: "Ruiz".to_string(),
            role,
            active: true,
            profile_complete: role != Role::Client,
        }
    }

    pub(crate) fn profile(id: i64, role: Role) -> Profile {
        Profile::from_record(record(id, role), at("2025-06-01T09:00:00Z"))
    }

    #[test]
    fn created_payload_defaults() {
        let record: UserRecord =
            serde_json::from_str(r#"{"id":5,"email":"a@b.com","name":"Ana","surname":"Ruiz"}"#).unwrap();
        assert_eq!(record.role, Role::Client);
        assert!(record.active);
        assert!(!record.profile_complete);
    }

    #[test]
    fn profile_json_carries_directory_fields() {
        let json = serde_json::to_value(profile(7, Role::Practitioner)).unwrap();
        for field in ["id", "email", "name", "surname", "role", "active", "profileComplete", "phone"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["role"], "practitioner");
    }

    #[test]
    fn patch_ignores_identity_fields() {
        let patch: ProfilePatch =
            serde_json::from_str(r#"{"id":1,"email":"x@y.z","role":"admin","active":false,"name":"Eva"}"#).unwrap();
        assert_eq!(
            patch,
            ProfilePatch {
                name: Some("Eva".to_string()),
                ..ProfilePatch::default()
            }
        );
    }

    #[test]
    fn search_covers_name_email_and_national_id() {
        let mut p = profile(3, Role::Client);
        p.national_id = Some("12345678A".to_string());
        let search = |s: &str| ProfileFilter {
            search: Some(s.to_string()),
            ..ProfileFilter::default()
        };

        assert!(search("ana").matches(&p));
        assert!(search("EXAMPLE.COM").matches(&p));
        assert!(search("5678a").matches(&p));
        assert!(!search("zzz").matches(&p));
        assert!(!ProfileFilter {
            role: Some(Role::Admin),
            ..ProfileFilter::default()
        }
        .matches(&p));
    }

    #[test]
    fn pagination_block() {
        let p = Pagination::new(2, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert_eq!(ProfileFilter { page: 3, limit: 20, ..ProfileFilter::default() }.offset(), 40);
    }
}
