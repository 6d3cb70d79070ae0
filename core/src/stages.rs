//! Stage-of-change tracking.
//!
//! Users move through the transtheoretical stages one step at a time. Moving
//! back is always allowed and is classified as a relapse when the user had
//! already reached `Action` or `Maintenance`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Days a user must sustain `Action` before `Maintenance` is suggested.
pub const MAINTENANCE_AFTER_DAYS: i64 = 180;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Precontemplation,
    Contemplation,
    Preparation,
    Action,
    Maintenance,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Precontemplation,
        Stage::Contemplation,
        Stage::Preparation,
        Stage::Action,
        Stage::Maintenance,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            Stage::Precontemplation => 0,
            Stage::Contemplation => 1,
            Stage::Preparation => 2,
            Stage::Action => 3,
            Stage::Maintenance => 4,
        }
    }

    pub fn next(self) -> Option<Stage> {
        Stage::ALL.get(usize::from(self.ordinal()) + 1).copied()
    }

    pub fn previous(self) -> Option<Stage> {
        usize::from(self.ordinal())
            .checked_sub(1)
            .and_then(|idx| Stage::ALL.get(idx).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Precontemplation => "precontemplation",
            Stage::Contemplation => "contemplation",
            Stage::Preparation => "preparation",
            Stage::Action => "action",
            Stage::Maintenance => "maintenance",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Stage> {
        let normalized = value.trim().to_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| {
                CoreError::validation("stage", format!("unknown stage '{value}'"))
            })
    }

    /// Map importance/confidence readiness rulers (0-10 each) to a starting
    /// stage. Maintenance is never inferred; it has to be earned.
    pub fn infer_from_readiness(importance: u8, confidence: u8) -> CoreResult<Stage> {
        if importance > 10 {
            return Err(CoreError::validation(
                "importance",
                format!("value {importance} outside 0..=10"),
            ));
        }
        if confidence > 10 {
            return Err(CoreError::validation(
                "confidence",
                format!("value {confidence} outside 0..=10"),
            ));
        }
        let readiness = (f64::from(importance) + f64::from(confidence)) / 2.0;
        Ok(if readiness < 3.0 {
            Stage::Precontemplation
        } else if readiness < 5.0 {
            Stage::Contemplation
        } else if readiness < 7.0 {
            Stage::Preparation
        } else {
            Stage::Action
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Initial,
    Advance,
    Regress,
    Relapse,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StageTransition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Stage>,
    pub to: Stage,
    pub kind: TransitionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StageRecord {
    pub user_id: Uuid,
    pub current: Stage,
    pub entered_at: DateTime<Utc>,
    pub history: Vec<StageTransition>,
}

impl StageRecord {
    pub fn new(user_id: Uuid, stage: Stage, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            current: stage,
            entered_at: at,
            history: vec![StageTransition {
                from: None,
                to: stage,
                kind: TransitionKind::Initial,
                reason: None,
                at,
            }],
        }
    }

    pub fn classify(from: Stage, to: Stage) -> CoreResult<TransitionKind> {
        let from_ord = i16::from(from.ordinal());
        let to_ord = i16::from(to.ordinal());
        match to_ord - from_ord {
            0 => Ok(TransitionKind::Hold),
            1 => Ok(TransitionKind::Advance),
            d if d > 1 => Err(CoreError::validation(
                "stage",
                format!(
                    "stages cannot be skipped: {} -> {}",
                    from.as_str(),
                    to.as_str()
                ),
            )),
            _ if from >= Stage::Action => Ok(TransitionKind::Relapse),
            _ => Ok(TransitionKind::Regress),
        }
    }

    pub fn transition(
        &mut self,
        to: Stage,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<&StageTransition> {
        if let Some(last) = self.history.last() {
            if at < last.at {
                return Err(CoreError::validation(
                    "at",
                    "transition timestamp precedes the latest recorded transition",
                ));
            }
        }

        let kind = Self::classify(self.current, to)?;
        if kind != TransitionKind::Hold {
            self.entered_at = at;
        }

        tracing::debug!(
            user_id = %self.user_id,
            from = self.current.as_str(),
            to = to.as_str(),
            kind = ?kind,
            "stage transition"
        );

        self.history.push(StageTransition {
            from: Some(self.current),
            to,
            kind,
            reason,
            at,
        });
        self.current = to;
        // history is never empty: `new` seeds it and we just pushed
        Ok(&self.history[self.history.len() - 1])
    }

    pub fn days_in_stage(&self, now: DateTime<Utc>) -> i64 {
        (now - self.entered_at).num_days().max(0)
    }

    pub fn eligible_for_maintenance(&self, now: DateTime<Utc>) -> bool {
        self.current == Stage::Action
            && now - self.entered_at >= Duration::days(MAINTENANCE_AFTER_DAYS)
    }

    pub fn relapse_count(&self) -> usize {
        self.history
            .iter()
            .filter(|t| t.kind == TransitionKind::Relapse)
            .count()
    }
}
