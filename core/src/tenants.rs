use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};

/// Tenant slug. Lowercase ASCII, digits and dashes, 2-63 chars, starting
/// with an alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(value: &str) -> CoreResult<Self> {
        let value = value.trim();
        let len_ok = (2..=63).contains(&value.len());
        let first_ok = value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let rest_ok = value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !(len_ok && first_ok && rest_ok) {
            return Err(CoreError::validation(
                "tenant_id",
                format!("'{value}' is not a valid tenant slug (a-z, 0-9, '-', 2-63 chars)"),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TenantPlan {
    Free,
    Standard,
    Enterprise,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AgentChat,
    Assessments,
    CoachWorkflow,
    Knowledge,
    Incentives,
    ExpertReview,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::AgentChat,
        Feature::Assessments,
        Feature::CoachWorkflow,
        Feature::Knowledge,
        Feature::Incentives,
        Feature::ExpertReview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::AgentChat => "agent_chat",
            Feature::Assessments => "assessments",
            Feature::CoachWorkflow => "coach_workflow",
            Feature::Knowledge => "knowledge",
            Feature::Incentives => "incentives",
            Feature::ExpertReview => "expert_review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TenantLimits {
    pub max_members: u32,
    pub max_documents: u32,
    pub max_daily_agent_turns: u32,
}

impl TenantPlan {
    pub fn limits(self) -> TenantLimits {
        match self {
            TenantPlan::Free => TenantLimits {
                max_members: 50,
                max_documents: 20,
                max_daily_agent_turns: 200,
            },
            TenantPlan::Standard => TenantLimits {
                max_members: 2_000,
                max_documents: 500,
                max_daily_agent_turns: 10_000,
            },
            TenantPlan::Enterprise => TenantLimits {
                max_members: u32::MAX,
                max_documents: u32::MAX,
                max_daily_agent_turns: u32::MAX,
            },
        }
    }

    pub fn features(self) -> &'static [Feature] {
        match self {
            TenantPlan::Free => &[
                Feature::AgentChat,
                Feature::Assessments,
                Feature::CoachWorkflow,
                Feature::Knowledge,
            ],
            TenantPlan::Standard | TenantPlan::Enterprise => &Feature::ALL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub plan: TenantPlan,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub disabled_features: BTreeSet<Feature>,
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>, plan: TenantPlan, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            plan,
            created_at: at,
            disabled_features: BTreeSet::new(),
        }
    }

    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.plan.features().contains(&feature) && !self.disabled_features.contains(&feature)
    }

    pub fn require_feature(&self, feature: Feature) -> CoreResult<()> {
        if self.feature_enabled(feature) {
            return Ok(());
        }
        Err(CoreError::policy(
            "feature_disabled",
            format!(
                "feature '{}' is not enabled for tenant '{}'",
                feature.as_str(),
                self.id
            ),
        ))
    }

    pub fn limits(&self) -> TenantLimits {
        self.plan.limits()
    }
}
