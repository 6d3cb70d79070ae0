//! Coach career ladder, case assignment and the escalation review queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::risk::{EscalationAction, RiskLevel, escalation_policy};
use crate::tenants::TenantId;

/// Average month length used for tenure thresholds.
const DAYS_PER_MONTH: i64 = 30;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CoachLevel {
    Trainee,
    Associate,
    Certified,
    Senior,
    Expert,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoachProfile {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub level: CoachLevel,
    /// When the coach reached the current level.
    pub active_since: DateTime<Utc>,
    pub sessions_completed: u32,
    pub avg_rating: f64,
    pub cases_closed: u32,
    pub training_hours: u32,
    pub supervision_hours: u32,
    pub caseload: u32,
    pub max_caseload: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PromotionRule {
    pub from: CoachLevel,
    pub to: CoachLevel,
    pub min_sessions: u32,
    pub min_rating: f64,
    pub min_cases: u32,
    pub min_training_hours: u32,
    pub min_months_at_level: u32,
    #[serde(default)]
    pub min_supervision_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UnmetRequirement {
    pub requirement: String,
    pub required: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PromotionCheck {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<CoachLevel>,
    pub unmet: Vec<UnmetRequirement>,
}

pub fn default_promotion_rules() -> Vec<PromotionRule> {
    let rule = |from, to, sessions, rating, cases, hours, months, supervision| PromotionRule {
        from,
        to,
        min_sessions: sessions,
        min_rating: rating,
        min_cases: cases,
        min_training_hours: hours,
        min_months_at_level: months,
        min_supervision_hours: supervision,
    };
    vec![
        rule(CoachLevel::Trainee, CoachLevel::Associate, 10, 3.5, 0, 20, 1, 0),
        rule(CoachLevel::Associate, CoachLevel::Certified, 50, 4.0, 10, 60, 3, 0),
        rule(CoachLevel::Certified, CoachLevel::Senior, 200, 4.3, 50, 120, 6, 10),
        rule(CoachLevel::Senior, CoachLevel::Expert, 500, 4.5, 150, 200, 12, 40),
    ]
}

pub fn evaluate_promotion(
    profile: &CoachProfile,
    rules: &[PromotionRule],
    now: DateTime<Utc>,
) -> PromotionCheck {
    let Some(rule) = rules.iter().find(|r| r.from == profile.level) else {
        return PromotionCheck {
            eligible: false,
            target: None,
            unmet: Vec::new(),
        };
    };

    let months_at_level = ((now - profile.active_since).num_days().max(0) / DAYS_PER_MONTH) as f64;
    let checks = [
        ("sessions_completed", f64::from(rule.min_sessions), f64::from(profile.sessions_completed)),
        ("avg_rating", rule.min_rating, profile.avg_rating),
        ("cases_closed", f64::from(rule.min_cases), f64::from(profile.cases_closed)),
        ("training_hours", f64::from(rule.min_training_hours), f64::from(profile.training_hours)),
        ("months_at_level", f64::from(rule.min_months_at_level), months_at_level),
        (
            "supervision_hours",
            f64::from(rule.min_supervision_hours),
            f64::from(profile.supervision_hours),
        ),
    ];

    let unmet: Vec<UnmetRequirement> = checks
        .into_iter()
        .filter(|(_, required, actual)| actual < required)
        .map(|(requirement, required, actual)| UnmetRequirement {
            requirement: requirement.to_string(),
            required,
            actual,
        })
        .collect();

    PromotionCheck {
        eligible: unmet.is_empty(),
        target: Some(rule.to),
        unmet,
    }
}

impl CoachProfile {
    pub fn new(
        tenant_id: TenantId,
        display_name: &str,
        level: CoachLevel,
        max_caseload: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            display_name: display_name.to_string(),
            level,
            active_since: at,
            sessions_completed: 0,
            avg_rating: 0.0,
            cases_closed: 0,
            training_hours: 0,
            supervision_hours: 0,
            caseload: 0,
            max_caseload,
        }
    }

    pub fn promote(
        &mut self,
        rules: &[PromotionRule],
        now: DateTime<Utc>,
    ) -> CoreResult<CoachLevel> {
        let check = evaluate_promotion(self, rules, now);
        match check.target {
            Some(target) if check.eligible => {
                tracing::info!(
                    coach_id = %self.id,
                    tenant_id = %self.tenant_id,
                    from = ?self.level,
                    to = ?target,
                    "coach promoted"
                );
                self.level = target;
                self.active_since = now;
                Ok(target)
            }
            Some(_) => {
                let names: Vec<&str> = check.unmet.iter().map(|u| u.requirement.as_str()).collect();
                Err(CoreError::policy(
                    "promotion_requirements_unmet",
                    format!("unmet requirements: {}", names.join(", ")),
                ))
            }
            None => Err(CoreError::policy(
                "promotion_requirements_unmet",
                format!("no promotion path from {:?}", self.level),
            )),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.caseload < self.max_caseload
    }

    fn load_ratio(&self) -> f64 {
        if self.max_caseload == 0 {
            return f64::INFINITY;
        }
        f64::from(self.caseload) / f64::from(self.max_caseload)
    }
}

pub fn required_level_for(risk: RiskLevel) -> CoachLevel {
    match risk {
        RiskLevel::None | RiskLevel::Low => CoachLevel::Associate,
        RiskLevel::Medium => CoachLevel::Certified,
        RiskLevel::High => CoachLevel::Senior,
        RiskLevel::Critical => CoachLevel::Expert,
    }
}

/// Least-loaded qualified coach with spare capacity. Ties prefer the more
/// senior coach, then the lower id.
pub fn assign_coach(coaches: &[CoachProfile], risk: RiskLevel) -> Option<&CoachProfile> {
    let required = required_level_for(risk);
    coaches
        .iter()
        .filter(|c| c.level >= required && c.has_capacity())
        .min_by(|a, b| {
            a.load_ratio()
                .total_cmp(&b.load_ratio())
                .then_with(|| b.level.cmp(&a.level))
                .then_with(|| a.id.cmp(&b.id))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Open,
    Assigned,
    InReview,
    Resolved,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewEvent {
    pub from: ReviewStatus,
    pub to: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Escalation {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub level: RiskLevel,
    pub action: EscalationAction,
    pub reason: String,
    pub status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub history: Vec<ReviewEvent>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewTransition {
    Assign { coach_id: Uuid },
    StartReview,
    Resolve { note: Option<String> },
    Escalate { note: Option<String> },
    Reopen,
}

impl Escalation {
    pub fn open(
        tenant_id: TenantId,
        user_id: Uuid,
        level: RiskLevel,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let policy = escalation_policy(level);
        let due_at = policy
            .response_sla_minutes
            .map(|minutes| at + Duration::minutes(i64::from(minutes)));
        let escalation = Self {
            id: Uuid::now_v7(),
            tenant_id,
            user_id,
            level,
            action: policy.action,
            reason: reason.into(),
            status: ReviewStatus::Open,
            assignee: None,
            created_at: at,
            due_at,
            history: Vec::new(),
        };
        let log_level_high = policy.requires_human;
        if log_level_high {
            tracing::warn!(
                escalation_id = %escalation.id,
                tenant_id = %escalation.tenant_id,
                user_id = %escalation.user_id,
                level = level.as_str(),
                action = ?escalation.action,
                "escalation opened"
            );
        } else {
            tracing::info!(
                escalation_id = %escalation.id,
                tenant_id = %escalation.tenant_id,
                level = level.as_str(),
                "escalation opened"
            );
        }
        escalation
    }

    fn move_to(
        &mut self,
        allowed_from: &[ReviewStatus],
        to: ReviewStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(CoreError::conflict(format!(
                "escalation {} cannot move from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.history.push(ReviewEvent {
            from: self.status,
            to,
            note,
            at,
        });
        self.status = to;
        Ok(())
    }

    pub fn assign(&mut self, coach_id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[ReviewStatus::Open], ReviewStatus::Assigned, None, at)?;
        self.assignee = Some(coach_id);
        Ok(())
    }

    pub fn start_review(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[ReviewStatus::Assigned], ReviewStatus::InReview, None, at)
    }

    pub fn resolve(&mut self, note: Option<String>, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[ReviewStatus::InReview], ReviewStatus::Resolved, note, at)
    }

    /// Hand the case up: the level rises one step and the SLA restarts.
    pub fn escalate(&mut self, note: Option<String>, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(
            &[ReviewStatus::Assigned, ReviewStatus::InReview],
            ReviewStatus::Escalated,
            note,
            at,
        )?;
        self.level = self.level.raised();
        let policy = escalation_policy(self.level);
        self.action = policy.action;
        self.due_at = policy
            .response_sla_minutes
            .map(|minutes| at + Duration::minutes(i64::from(minutes)));
        self.assignee = None;
        Ok(())
    }

    pub fn reopen(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[ReviewStatus::Escalated], ReviewStatus::Open, None, at)
    }

    pub fn apply(&mut self, transition: ReviewTransition, at: DateTime<Utc>) -> CoreResult<()> {
        match transition {
            ReviewTransition::Assign { coach_id } => self.assign(coach_id, at),
            ReviewTransition::StartReview => self.start_review(at),
            ReviewTransition::Resolve { note } => self.resolve(note, at),
            ReviewTransition::Escalate { note } => self.escalate(note, at),
            ReviewTransition::Reopen => self.reopen(at),
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status != ReviewStatus::Resolved && self.due_at.is_some_and(|due| now > due)
    }
}
