//! Wire types exchanged with the attendance backend.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The four account roles. Every access decision matches on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Lecturer,
    Examiner,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Lecturer, Role::Examiner, Role::Admin];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "student" => Some(Self::Student),
            "lecturer" => Some(Self::Lecturer),
            "examiner" => Some(Self::Examiner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Lecturer => "lecturer",
            Self::Examiner => "examiner",
            Self::Admin => "admin",
        }
    }

    /// Capitalized form for display
    pub fn title(&self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Lecturer => "Lecturer",
            Self::Examiner => "Examiner",
            Self::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_str(s).ok_or_else(|| {
            let expected: Vec<&str> = Role::ALL.iter().map(Role::as_str).collect();
            format!("unknown role '{}', expected one of: {}", s, expected.join(", "))
        })
    }
}

/// A user as returned by the backend and kept in the session
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
    #[serde(
        default,
        deserialize_with = "lenient_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub courses: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub levels: Option<Vec<i64>>,
    /// Fields this client does not model, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Updated users come back with list columns still encoded as JSON text, so
/// accept an array or a string holding one. Anything else reads as absent.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => serde_json::from_str(&text).ok(),
        Some(list @ Value::Array(_)) => serde_json::from_value(list).ok(),
        _ => None,
    })
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Body of `POST /register`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courses: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<i64>>,
}

/// Partial update for `PUT /users/{id}`; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courses: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<i64>>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Envelope shared by every backend response. The endpoint-specific payload
/// sits next to `status` and `message` at the top level.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub payload: T,
}

/// Payload for endpoints that only acknowledge
pub type Ack = Map<String, Value>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginPayload {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SingleUser {
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttendanceList {
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,
}

/// Dashboard payloads vary per role; keep them loose
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardData {
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub stats: Map<String, Value>,
}

/// One attendance row. The backend's shapes differ between endpoints, so every
/// field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AttendanceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How an attendance mark was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    #[default]
    Manual,
    Qr,
    Face,
}

impl AttendanceMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "qr" | "qr-code" | "qr_code" => Some(Self::Qr),
            "face" => Some(Self::Face),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            _ => None,
        }
    }
}

/// Body of `POST /mark_attendance`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkAttendance {
    pub student_id: String,
    pub course_id: String,
    pub method: AttendanceMethod,
    pub status: AttendanceStatus,
}

impl MarkAttendance {
    /// Manual present mark, the common case
    pub fn present(student_id: &str, course_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            method: AttendanceMethod::default(),
            status: AttendanceStatus::default(),
        }
    }
}

/// Filters for `GET /get_attendance`. Only the filters that are set reach
/// the query string, in the order they were set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttendanceFilters {
    params: Vec<(&'static str, String)>,
}

impl AttendanceFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn course_id(self, course_id: impl Into<String>) -> Self {
        self.with("course_id", course_id.into())
    }

    pub fn date(self, date: NaiveDate) -> Self {
        self.with("date", date.format("%Y-%m-%d").to_string())
    }

    pub fn student_id(self, student_id: impl Into<String>) -> Self {
        self.with("student_id", student_id.into())
    }

    fn with(mut self, key: &'static str, value: String) -> Self {
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.params.push((key, value));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[(&'static str, String)] {
        &self.params
    }
}

/// Body of `POST /register_face`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRegistration {
    pub student_id: String,
    pub face_encoding: Vec<f64>,
}
