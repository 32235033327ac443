//! Test doubles for the transport seam.

use crate::app::AppContext;
use crate::config::Config;
use crate::model::{Role, UserProfile};
use crate::session::SessionStore;
use crate::transport::{Body, HttpRequest, HttpResponse, Method, Transport, TransportError};
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

pub fn profile(user_id: &str, role: Role) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        name: format!("User {}", user_id),
        email: format!("{}@campus.test", user_id.to_lowercase()),
        role,
        level: None,
        program: None,
        department: None,
        courses: None,
        levels: None,
        extra: Map::new(),
    }
}

/// Context over an in-memory session and the given transport
pub fn test_context(transport: &FakeTransport) -> AppContext {
    let mut config = Config::default();
    config.api.base_url = "http://backend.test".to_string();
    AppContext::new(config, SessionStore::in_memory(), Box::new(transport.clone()))
        .expect("test context")
}

#[derive(Default)]
struct Script {
    responses: VecDeque<Result<HttpResponse, TransportError>>,
    requests: Vec<HttpRequest>,
}

/// Replays queued responses in order and records every request. Clones share
/// the same script.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Rc<RefCell<Script>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push_raw(status, &body.to_string());
    }

    pub fn push_raw(&self, status: u16, body: &str) {
        self.script.borrow_mut().responses.push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_network_error(&self, message: &str) {
        self.script
            .borrow_mut()
            .responses
            .push_back(Err(TransportError(message.to_string())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.borrow().requests.clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.script.borrow().requests.last().cloned()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut script = self.script.borrow_mut();
        script.requests.push(request.clone());
        script
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("no scripted response".to_string())))
    }
}

#[derive(Default)]
struct BackendState {
    users: BTreeMap<String, (UserProfile, String)>,
    tokens: BTreeMap<String, String>,
    next_token: u32,
    attendance: Vec<Value>,
}

/// A small in-memory stand-in for the attendance backend. Understands the
/// login, user, and attendance endpoints, with the real backend's messages.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserProfile, password: &str) {
        self.state
            .borrow_mut()
            .users
            .insert(user.user_id.clone(), (user, password.to_string()));
    }

    /// Invalidate every issued token
    pub fn expire_tokens(&self) {
        self.state.borrow_mut().tokens.clear();
    }

    pub fn attendance(&self) -> Vec<Value> {
        self.state.borrow().attendance.clone()
    }

    fn reply(status: u16, body: Value) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status,
            body: body.to_string(),
        })
    }

    fn caller(&self, request: &HttpRequest) -> Result<UserProfile, Result<HttpResponse, TransportError>> {
        let state = self.state.borrow();
        let token = match request
            .header("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(token) if !token.is_empty() => token,
            _ => return Err(Self::reply(401, json!({"status": "error", "message": "Token is missing"}))),
        };
        let Some(user_id) = state.tokens.get(token) else {
            return Err(Self::reply(401, json!({"status": "error", "message": "Token has expired"})));
        };
        match state.users.get(user_id) {
            Some((user, _)) => Ok(user.clone()),
            None => Err(Self::reply(401, json!({"status": "error", "message": "User not found"}))),
        }
    }

    fn require_admin(&self, request: &HttpRequest) -> Result<UserProfile, Result<HttpResponse, TransportError>> {
        let user = self.caller(request)?;
        if user.role != Role::Admin {
            return Err(Self::reply(403, json!({"status": "error", "message": "Unauthorized"})));
        }
        Ok(user)
    }
}

impl Transport for FakeBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request
            .url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, p)| format!("/{}", p))
            .unwrap_or_default();
        let path = path.split('?').next().unwrap_or_default().to_string();
        let body = match &request.body {
            Body::Json(v) => v.clone(),
            _ => Value::Null,
        };

        match (request.method, path.as_str()) {
            (Method::Post, "/login") => {
                let user_id = body["user_id"].as_str().unwrap_or_default();
                let password = body["password"].as_str().unwrap_or_default();
                let mut state = self.state.borrow_mut();
                let Some((user, stored)) = state.users.get(user_id).cloned() else {
                    return Self::reply(401, json!({"status": "error", "message": "User not found"}));
                };
                if stored != password {
                    return Self::reply(401, json!({"status": "error", "message": "Invalid credentials"}));
                }
                state.next_token += 1;
                let token = format!("token-{}", state.next_token);
                state.tokens.insert(token.clone(), user_id.to_string());
                Self::reply(200, json!({"status": "success", "token": token, "user": user}))
            }
            (Method::Get, "/users") => {
                if let Err(resp) = self.require_admin(request) {
                    return resp;
                }
                let users: Vec<UserProfile> =
                    self.state.borrow().users.values().map(|(u, _)| u.clone()).collect();
                Self::reply(200, json!({"status": "success", "users": users}))
            }
            (Method::Post, "/register") => {
                if let Err(resp) = self.require_admin(request) {
                    return resp;
                }
                let mut user: UserProfile = match serde_json::from_value(body.clone()) {
                    Ok(u) => u,
                    Err(_) => {
                        return Self::reply(400, json!({"status": "error", "message": "Missing required fields"}))
                    }
                };
                user.extra.remove("password");
                let password = body["password"].as_str().unwrap_or_default().to_string();
                self.add_user(user, &password);
                Self::reply(200, json!({"status": "success", "message": "User created successfully"}))
            }
            (Method::Delete, p) if p.starts_with("/users/") => {
                if let Err(resp) = self.require_admin(request) {
                    return resp;
                }
                let id = &p["/users/".len()..];
                if self.state.borrow_mut().users.remove(id).is_some() {
                    Self::reply(200, json!({"status": "success", "message": "User deleted successfully"}))
                } else {
                    Self::reply(400, json!({"status": "error", "message": "Failed to delete user"}))
                }
            }
            (Method::Post, "/mark_attendance") => {
                if let Err(resp) = self.caller(request) {
                    return resp;
                }
                self.state.borrow_mut().attendance.push(body);
                Self::reply(200, json!({"status": "success", "message": "Attendance marked"}))
            }
            _ => Self::reply(404, json!({"status": "error", "message": "Not found"})),
        }
    }
}
