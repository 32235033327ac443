//! Application context shared by every page.
//!
//! Built once at startup and handed to each page handler, so nothing about
//! the session or the backend lives in globals.

use crate::api::{ApiClient, ApiError};
use crate::auth::Auth;
use crate::classify::{ErrorClassifier, Remedy};
use crate::config::Config;
use crate::routes::{ConsoleNavigator, GuardDecision};
use crate::session::SessionStore;
use crate::transport::{Transport, UreqTransport};
use anyhow::Result;
use std::rc::Rc;
use tracing::debug;

pub struct AppContext {
    pub config: Config,
    pub session: Rc<SessionStore>,
    pub api: Rc<ApiClient>,
    pub auth: Auth,
    pub classifier: ErrorClassifier,
    pub navigator: Rc<ConsoleNavigator>,
}

impl AppContext {
    pub fn new(config: Config, session: SessionStore, transport: Box<dyn Transport>) -> Result<Self> {
        let session = Rc::new(session);
        let api = Rc::new(ApiClient::new(
            &config.api.base_url,
            transport,
            session.clone(),
            config.error_patterns()?,
        ));
        let navigator = Rc::new(ConsoleNavigator::new());
        let auth = Auth::new(session.clone(), api.clone(), navigator.clone());

        Ok(Self {
            config,
            session,
            api,
            auth,
            classifier: ErrorClassifier::new(),
            navigator,
        })
    }

    /// Context talking to the configured backend with the session on disk
    pub fn from_config(config: Config) -> Result<Self> {
        let session_dir = config.session_dir();
        debug!(dir = %session_dir.display(), base_url = %config.api.base_url, "building context");
        let transport = UreqTransport::new(config.api.timeout());
        Self::new(config, SessionStore::on_disk(session_dir), Box::new(transport))
    }

    /// Load `page`: resolve the session and run the route guard
    pub fn enter(&self, page: &str) -> GuardDecision {
        self.auth.load_page(page)
    }

    /// Route a failed call through the error classifier
    pub fn report(&self, error: &ApiError, context: &str) -> Remedy {
        self.classifier.handle(error, context, &self.auth)
    }
}
