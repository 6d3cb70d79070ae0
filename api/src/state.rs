use std::sync::Arc;

use haven_core::agents::{AgentResponder, RoutingTable, TemplateResponder};
use haven_core::assessments::InstrumentRegistry;
use haven_core::interventions::InterventionCatalog;
use haven_core::safety::{SafetyClassifier, SafetyConfig, SafetyPipeline};
use tokio::sync::RwLock;

use crate::store::Store;

/// Who may create tenants through `POST /v1/admin/tenants`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignupGate {
    /// `admin` or `tenants:create` scope.
    Open,
    /// `admin` scope only.
    Invite,
}

impl SignupGate {
    /// Only an explicit `open` opens signup.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "open" => Self::Open,
            _ => Self::Invite,
        }
    }

    pub fn creation_scopes(self) -> &'static [&'static str] {
        match self {
            Self::Open => &["admin", "tenants:create"],
            Self::Invite => &["admin"],
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<Store>>,
    pub safety: Arc<SafetyPipeline>,
    pub instruments: Arc<InstrumentRegistry>,
    pub routing: Arc<RoutingTable>,
    pub catalog: Arc<InterventionCatalog>,
    pub responders: Arc<Vec<Box<dyn AgentResponder>>>,
    /// Last safety layer; `None` runs keyword and retrieval only.
    pub classifier: Option<Arc<dyn SafetyClassifier>>,
    pub signup_gate: SignupGate,
}

impl AppState {
    pub fn new(
        store: Store,
        safety_config: SafetyConfig,
        signup_gate: SignupGate,
    ) -> Result<Self, haven_core::error::CoreError> {
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            safety: Arc::new(SafetyPipeline::new(safety_config)?),
            instruments: Arc::new(InstrumentRegistry::with_builtins()),
            routing: Arc::new(RoutingTable::default()),
            catalog: Arc::new(InterventionCatalog::with_defaults()),
            responders: Arc::new(TemplateResponder::all()),
            classifier: None,
            signup_gate,
        })
    }

    pub fn classifier(&self) -> Option<&dyn SafetyClassifier> {
        self.classifier.as_deref()
    }
}
