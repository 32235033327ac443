//! Page paths and the route guard.
//!
//! Every command of the client is a page with a site path such as
//! `admin/users.html`. The first path segment naming a role marks the page as
//! part of that role's section. The guard decides, from the session alone,
//! whether the page may load or where the user must go instead.

use crate::model::{Role, UserProfile};
use std::cell::RefCell;
use tracing::info;

/// Where unauthenticated users land
pub const LANDING_PAGE: &str = "index.html";
pub const LOGIN_FILE: &str = "login.html";
pub const DASHBOARD_FILE: &str = "index.html";

pub fn login_page(role: Role) -> String {
    format!("{}/{}", role, LOGIN_FILE)
}

pub fn dashboard_page(role: Role) -> String {
    format!("{}/{}", role, DASHBOARD_FILE)
}

/// Role section a path belongs to, if any. The role segment must be followed
/// by a page, so `admin` alone is not inside the admin section.
pub fn section_of(path: &str) -> Option<Role> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.len().saturating_sub(1);
    segments[..last]
        .iter()
        .find_map(|segment| Role::from_str(segment).filter(|r| r.as_str() == *segment))
}

pub fn is_login_page(path: &str) -> bool {
    path.rsplit('/').next() == Some(LOGIN_FILE)
}

/// Outcome of the route guard for one page load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    Redirect(String),
}

/// Evaluate the route guard for `path` given the current user, `None` when
/// unauthenticated.
pub fn guard(path: &str, user: Option<&UserProfile>) -> GuardDecision {
    let section = section_of(path);
    let login = is_login_page(path);

    match (user, section) {
        (None, Some(section)) if !login => GuardDecision::Redirect(login_page(section)),
        (Some(user), _) if login => GuardDecision::Redirect(dashboard_page(user.role)),
        (Some(user), Some(section)) if section != user.role => {
            GuardDecision::Redirect(LANDING_PAGE.to_string())
        }
        _ => GuardDecision::Proceed,
    }
}

/// Performs navigation. The gatekeeper is the only caller.
pub trait Navigator {
    fn navigate(&self, path: &str);
}

/// Records the current location and reports moves through the log
#[derive(Debug, Default)]
pub struct ConsoleNavigator {
    location: RefCell<Option<String>>,
}

impl ConsoleNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self) -> Option<String> {
        self.location.borrow().clone()
    }
}

impl Navigator for ConsoleNavigator {
    fn navigate(&self, path: &str) {
        info!(to = path, "navigating");
        *self.location.borrow_mut() = Some(path.to_string());
    }
}
