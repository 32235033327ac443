//! Turns failed API calls into the action the user sees.
//!
//! This is the one place that decides between forcing a logout, showing a
//! permission notice, and reporting the error; page handlers pass every
//! failure through `ErrorClassifier::handle` instead of inspecting it.

use crate::api::{ApiError, ErrorKind};
use crate::auth::Auth;
use tracing::{info, warn};

pub const PERMISSION_NOTICE: &str = "You are not authorized to perform this action.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remedy {
    /// The session was cleared and the user sent to the landing page
    ForcedLogout,
    PermissionNotice(String),
    Display(String),
}

impl Remedy {
    pub fn message(&self) -> String {
        match self {
            Remedy::ForcedLogout => "Your session has expired. Please log in again.".to_string(),
            Remedy::PermissionNotice(msg) | Remedy::Display(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Decide without side effects
    pub fn classify(&self, error: &ApiError, context: &str) -> Remedy {
        match error.kind() {
            ErrorKind::SessionExpired => Remedy::ForcedLogout,
            ErrorKind::PermissionDenied => Remedy::PermissionNotice(PERMISSION_NOTICE.to_string()),
            ErrorKind::Other => Remedy::Display(format!("Error {}: {}", context, error)),
        }
    }

    /// Classify and apply. A forced logout clears the session through `auth`.
    pub fn handle(&self, error: &ApiError, context: &str, auth: &Auth) -> Remedy {
        let remedy = self.classify(error, context);
        match &remedy {
            Remedy::ForcedLogout => {
                info!(context, "session rejected by server, logging out");
                auth.logout();
            }
            Remedy::PermissionNotice(_) => {
                warn!(context, status = ?error.http_status(), "permission denied");
            }
            Remedy::Display(_) => {
                warn!(context, status = ?error.http_status(), error = %error, "request failed");
            }
        }
        remedy
    }
}
