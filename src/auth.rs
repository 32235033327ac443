//! Authentication gatekeeper.
//!
//! `Auth` owns the answer to "may this page render": it reads the session,
//! runs the route guard on page load, and is the only component that
//! navigates because of auth state.

use crate::api::{merge_headers, ApiClient, ApiError, RequestOptions};
use crate::model::{ResponseStatus, Role, UserProfile};
use crate::routes::{self, GuardDecision, Navigator, LANDING_PAGE};
use crate::session::SessionStore;
use crate::transport::HttpResponse;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

pub const NETWORK_FAILURE_MESSAGE: &str = "Network error. Please try again.";

/// Per-page authentication state
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// Before the session has been read for this page
    Unknown,
    Authenticated(UserProfile),
    Unauthenticated,
}

/// Result of `Auth::login`; login never surfaces an error
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Success(UserProfile),
    Failure(String),
}

pub struct Auth {
    session: Rc<SessionStore>,
    api: Rc<ApiClient>,
    navigator: Rc<dyn Navigator>,
    state: RefCell<AuthState>,
}

impl Auth {
    pub fn new(session: Rc<SessionStore>, api: Rc<ApiClient>, navigator: Rc<dyn Navigator>) -> Self {
        Self {
            session,
            api,
            navigator,
            state: RefCell::new(AuthState::Unknown),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.load().is_authenticated()
    }

    pub fn has_role(&self, role: Role) -> bool {
        let session = self.session.load();
        session.is_authenticated() && session.user.is_some_and(|u| u.role == role)
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.session.user()
    }

    /// Page load: resolve the auth state from the session and apply the route
    /// guard for `path`. Callers must not run page logic unless this returns
    /// `GuardDecision::Proceed`.
    pub fn load_page(&self, path: &str) -> GuardDecision {
        let session = self.session.load();
        let user = session.user.filter(|_| session.token.is_some());

        *self.state.borrow_mut() = match &user {
            Some(user) => AuthState::Authenticated(user.clone()),
            None => AuthState::Unauthenticated,
        };

        let decision = routes::guard(path, user.as_ref());
        if let GuardDecision::Redirect(target) = &decision {
            info!(from = path, to = %target, "route guard redirect");
            self.navigator.navigate(target);
        }
        decision
    }

    /// Exchange credentials for a session. On success the token and user are
    /// stored; on failure the session is left as it was.
    pub fn login(&self, user_id: &str, password: &str, role: Role) -> LoginOutcome {
        match self.api.login(user_id, password, role) {
            Ok(resp) if resp.status == ResponseStatus::Success => {
                let payload = resp.payload;
                if let Err(e) = self.session.save(&payload.token, &payload.user) {
                    warn!(error = %e, "could not persist session");
                    return LoginOutcome::Failure(format!("Could not save session: {}", e));
                }
                info!(user_id = %payload.user.user_id, role = %payload.user.role, "logged in");
                *self.state.borrow_mut() = AuthState::Authenticated(payload.user.clone());
                LoginOutcome::Success(payload.user)
            }
            Ok(resp) => LoginOutcome::Failure(
                resp.message.unwrap_or_else(|| "Login failed".to_string()),
            ),
            Err(ApiError::Api { message, .. }) => LoginOutcome::Failure(message),
            Err(ApiError::InvalidResponse(detail)) => {
                warn!(%detail, "unexpected login response");
                LoginOutcome::Failure(format!("Invalid response from server: {}", detail))
            }
            Err(e) => {
                warn!(error = %e, "login request failed");
                LoginOutcome::Failure(NETWORK_FAILURE_MESSAGE.to_string())
            }
        }
    }

    /// Drop the session and go to the landing page
    pub fn logout(&self) {
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "failed to clear session on logout");
        }
        *self.state.borrow_mut() = AuthState::Unauthenticated;
        info!("logged out");
        self.navigator.navigate(LANDING_PAGE);
    }

    /// Raw request to an absolute `url` with the bearer token and a JSON
    /// content-type always injected (content-type is skipped for multipart
    /// bodies). Caller headers win. The response is returned unparsed.
    pub fn authenticated_request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        let mut defaults = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.session.token().unwrap_or_default()),
        )];
        if !options.body.is_multipart() {
            defaults.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        let headers = merge_headers(defaults, &options.headers);
        self.api.dispatch(url.to_string(), headers, options)
    }
}
