//! REST client for the attendance backend.
//!
//! `ApiClient::request` is the single path to the backend: it builds the URL,
//! merges headers, runs the transport and turns every failure into an
//! `ApiError`. The resource methods below it only fix method, path and body.

use crate::model::{
    Ack, ApiResponse, AttendanceFilters, AttendanceList, DashboardData, DashboardStats,
    FaceRegistration, LoginPayload, MarkAttendance, NewUser, Role, SingleUser,
    UserList, UserUpdate,
};
use crate::session::SessionStore;
use anyhow::Context as _;
use crate::transport::{Body, HttpRequest, HttpResponse, Method, MultipartForm, Transport};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What a backend failure means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bearer token was rejected; the session is no longer usable
    SessionExpired,
    /// The session is fine but the caller may not perform this action
    PermissionDenied,
    Other,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        kind: ErrorKind,
    },
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Api { kind, .. } => *kind,
            _ => ErrorKind::Other,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Expiry messages sent by the backend's token check
pub const DEFAULT_SESSION_EXPIRED_PATTERNS: &[&str] =
    &["Token has expired", "Token is invalid", "Token is missing"];

pub const DEFAULT_PERMISSION_PATTERNS: &[&str] = &["Unauthorized"];

/// Message patterns used to tag backend failures with an `ErrorKind`.
/// The backend reports expiry and permission problems only through message
/// text, so the patterns live in configuration.
#[derive(Debug, Clone)]
pub struct ErrorPatterns {
    session_expired: Vec<Regex>,
    permission: Vec<Regex>,
}

impl ErrorPatterns {
    pub fn new<S: AsRef<str>>(session_expired: &[S], permission: &[S]) -> Result<Self, regex::Error> {
        let compile = |patterns: &[S]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
        };
        Ok(Self {
            session_expired: compile(session_expired)?,
            permission: compile(permission)?,
        })
    }

    pub fn classify(&self, status: u16, message: &str) -> ErrorKind {
        if status == 401 && self.session_expired.iter().any(|re| re.is_match(message)) {
            ErrorKind::SessionExpired
        } else if status == 403 || self.permission.iter().any(|re| re.is_match(message)) {
            ErrorKind::PermissionDenied
        } else {
            ErrorKind::Other
        }
    }
}

/// Shared flag that abandons a request. Checked before dispatch and again
/// when the response arrives.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options for `ApiClient::request`
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
            cancel: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn delete() -> Self {
        Self {
            method: Method::Delete,
            ..Self::default()
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Body::Json(body),
            ..Self::default()
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            method: Method::Put,
            body: Body::Json(body),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Overlay `overrides` on `defaults`; header names compare case-insensitively
/// and the override wins.
pub fn merge_headers(
    defaults: Vec<(String, String)>,
    overrides: &[(String, String)],
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .into_iter()
        .filter(|(name, _)| !overrides.iter().any(|(o, _)| o.eq_ignore_ascii_case(name)))
        .collect();
    merged.extend(overrides.iter().cloned());
    merged
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("failed to encode request: {}", e)))
}

pub struct ApiClient {
    base_url: String,
    transport: Box<dyn Transport>,
    session: Rc<SessionStore>,
    patterns: ErrorPatterns,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        transport: Box<dyn Transport>,
        session: Rc<SessionStore>,
        patterns: ErrorPatterns,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            session,
            patterns,
        }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn default_headers(&self, body: &Body) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !body.is_multipart() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = self.session.token() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers
    }

    /// Run a request against the transport with the given, already merged,
    /// headers. Shared by `request` and the gatekeeper's raw requests.
    pub fn dispatch(
        &self,
        url: String,
        headers: Vec<(String, String)>,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(ApiError::Cancelled);
        }

        let request = HttpRequest {
            method: options.method,
            url,
            headers,
            body: options.body,
            timeout: options.timeout,
        };
        debug!(method = %request.method, url = %request.url, "sending request");

        let response = self.transport.send(&request).map_err(|e| {
            warn!(url = %request.url, error = %e, "request failed before a response");
            ApiError::Network(e.0)
        })?;

        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            debug!(url = %request.url, "discarding response of cancelled request");
            return Err(ApiError::Cancelled);
        }
        Ok(response)
    }

    /// Perform a request and return the parsed JSON body
    pub fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let headers = merge_headers(self.default_headers(&options.body), &options.headers);
        let response = self.dispatch(self.url_for(endpoint), headers, options)?;

        let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from);

        if !response.is_success() {
            let message =
                message.unwrap_or_else(|| format!("HTTP error! status: {}", response.status));
            let kind = self.patterns.classify(response.status, &message);
            warn!(endpoint, status = response.status, ?kind, %message, "API request failed");
            return Err(ApiError::Api {
                status: response.status,
                message,
                kind,
            });
        }

        let body = parsed.ok_or_else(|| {
            ApiError::InvalidResponse(format!("{} did not return JSON", endpoint))
        })?;

        if body.get("status").and_then(|s| s.as_str()) == Some("error") {
            let message = message.unwrap_or_else(|| "Request failed".to_string());
            let kind = self.patterns.classify(response.status, &message);
            return Err(ApiError::Api {
                status: response.status,
                message,
                kind,
            });
        }

        Ok(body)
    }

    /// `request` decoded into a typed envelope
    pub fn request_as<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ApiError> {
        let body = self.request(endpoint, options)?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", endpoint, e)))
    }

    /// Credential exchange. Does not touch the session; see `Auth::login`.
    pub fn login(
        &self,
        user_id: &str,
        password: &str,
        role: Role,
    ) -> Result<ApiResponse<LoginPayload>, ApiError> {
        self.request_as(
            "/login",
            RequestOptions::post(json!({
                "user_id": user_id,
                "password": password,
                "role": role,
            })),
        )
    }

    pub fn get_all_users(&self) -> Result<ApiResponse<UserList>, ApiError> {
        self.request_as("/users", RequestOptions::get())
    }

    pub fn get_users_by_role(&self, role: Role) -> Result<ApiResponse<UserList>, ApiError> {
        self.request_as(&format!("/users/by-role/{}", role), RequestOptions::get())
    }

    pub fn get_user(&self, user_id: &str) -> Result<ApiResponse<SingleUser>, ApiError> {
        self.request_as(
            &format!("/users/{}", urlencoding::encode(user_id)),
            RequestOptions::get(),
        )
    }

    pub fn create_user(&self, user: &NewUser) -> Result<ApiResponse<Ack>, ApiError> {
        self.request_as("/register", RequestOptions::post(serialize(user)?))
    }

    pub fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<ApiResponse<Ack>, ApiError> {
        self.request_as(
            &format!("/users/{}", urlencoding::encode(user_id)),
            RequestOptions::put(serialize(update)?),
        )
    }

    pub fn delete_user(&self, user_id: &str) -> Result<ApiResponse<Ack>, ApiError> {
        self.request_as(
            &format!("/users/{}", urlencoding::encode(user_id)),
            RequestOptions::delete(),
        )
    }

    pub fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<ApiResponse<Ack>, ApiError> {
        self.request_as(
            "/change_password",
            RequestOptions::post(json!({
                "old_password": old_password,
                "new_password": new_password,
            })),
        )
    }

    /// Upload a CSV of users. `file_name` is only used for the form part.
    pub fn bulk_upload_users(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        default_role: Role,
    ) -> Result<ApiResponse<Ack>, ApiError> {
        let form = MultipartForm::new()
            .file("file", file_name, "text/csv", contents)
            .text("default_role", default_role.as_str());
        let options = RequestOptions {
            method: Method::Post,
            body: Body::Multipart(form),
            ..RequestOptions::default()
        };
        self.request_as("/bulk-upload", options)
    }

    /// Read `path` and upload it with `bulk_upload_users`
    pub fn bulk_upload_file(
        &self,
        path: &Path,
        default_role: Role,
    ) -> anyhow::Result<ApiResponse<Ack>> {
        let contents = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.csv".to_string());
        Ok(self.bulk_upload_users(&name, contents, default_role)?)
    }

    pub fn mark_attendance(&self, mark: &MarkAttendance) -> Result<ApiResponse<Ack>, ApiError> {
        self.mark_attendance_with(mark, RequestOptions::default())
    }

    /// `mark_attendance` under the caller's timeout and cancel token
    pub fn mark_attendance_with(
        &self,
        mark: &MarkAttendance,
        options: RequestOptions,
    ) -> Result<ApiResponse<Ack>, ApiError> {
        let options = RequestOptions {
            method: Method::Post,
            body: Body::Json(serialize(mark)?),
            ..options
        };
        self.request_as("/mark_attendance", options)
    }

    pub fn get_attendance(
        &self,
        filters: &AttendanceFilters,
    ) -> Result<ApiResponse<AttendanceList>, ApiError> {
        self.request_as(&attendance_endpoint(filters), RequestOptions::get())
    }

    pub fn get_dashboard_stats(&self) -> Result<ApiResponse<DashboardStats>, ApiError> {
        self.request_as("/dashboard/stats", RequestOptions::get())
    }

    pub fn register_face(
        &self,
        student_id: &str,
        face_encoding: &[f64],
    ) -> Result<ApiResponse<Ack>, ApiError> {
        let body = FaceRegistration {
            student_id: student_id.to_string(),
            face_encoding: face_encoding.to_vec(),
        };
        self.request_as("/register_face", RequestOptions::post(serialize(&body)?))
    }

    pub fn train_model(&self) -> Result<ApiResponse<Ack>, ApiError> {
        let options = RequestOptions {
            method: Method::Post,
            ..RequestOptions::default()
        };
        self.request_as("/train_model", options)
    }

    pub fn get_student_dashboard(&self) -> Result<ApiResponse<DashboardData>, ApiError> {
        self.request_as("/student/dashboard", RequestOptions::get())
    }

    pub fn get_student_attendance(&self) -> Result<ApiResponse<AttendanceList>, ApiError> {
        self.request_as("/student/attendance", RequestOptions::get())
    }

    pub fn get_lecturer_dashboard(&self) -> Result<ApiResponse<DashboardData>, ApiError> {
        self.request_as("/lecturer/dashboard", RequestOptions::get())
    }

    pub fn get_lecturer_attendance(&self) -> Result<ApiResponse<AttendanceList>, ApiError> {
        self.request_as("/lecturer/attendance", RequestOptions::get())
    }
}

/// `/get_attendance` plus a query string holding only the filters that are set
pub fn attendance_endpoint(filters: &AttendanceFilters) -> String {
    if filters.is_empty() {
        return "/get_attendance".to_string();
    }
    let query: Vec<String> = filters
        .params()
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect();
    format!("/get_attendance?{}", query.join("&"))
}
