use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bucket a 0.0-1.0 risk score. Out-of-range scores are clamped.
    pub fn from_score(score: f64) -> RiskLevel {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        if score < 0.2 {
            RiskLevel::None
        } else if score < 0.4 {
            RiskLevel::Low
        } else if score < 0.6 {
            RiskLevel::Medium
        } else if score < 0.85 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn requires_human(self) -> bool {
        escalation_policy(self).requires_human
    }

    /// One level up, saturating at Critical.
    pub fn raised(self) -> RiskLevel {
        match self {
            RiskLevel::None => RiskLevel::Low,
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    None,
    Monitor,
    NotifyCoach,
    ExpertReview,
    CrisisProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct EscalationPolicy {
    pub action: EscalationAction,
    /// Minutes until a human must respond. `None` means no SLA.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_sla_minutes: Option<u32>,
    pub requires_human: bool,
}

pub fn escalation_policy(level: RiskLevel) -> EscalationPolicy {
    match level {
        RiskLevel::None => EscalationPolicy {
            action: EscalationAction::None,
            response_sla_minutes: None,
            requires_human: false,
        },
        RiskLevel::Low => EscalationPolicy {
            action: EscalationAction::Monitor,
            response_sla_minutes: Some(7 * 24 * 60),
            requires_human: false,
        },
        RiskLevel::Medium => EscalationPolicy {
            action: EscalationAction::NotifyCoach,
            response_sla_minutes: Some(24 * 60),
            requires_human: false,
        },
        RiskLevel::High => EscalationPolicy {
            action: EscalationAction::ExpertReview,
            response_sla_minutes: Some(4 * 60),
            requires_human: true,
        },
        RiskLevel::Critical => EscalationPolicy {
            action: EscalationAction::CrisisProtocol,
            response_sla_minutes: Some(15),
            requires_human: true,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskSource {
    Assessment,
    SafetyFilter,
    CoachReport,
    StageRelapse,
}

impl RiskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskSource::Assessment => "assessment",
            RiskSource::SafetyFilter => "safety_filter",
            RiskSource::CoachReport => "coach_report",
            RiskSource::StageRelapse => "stage_relapse",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskSignal {
    pub source: RiskSource,
    pub level: RiskLevel,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub signals: Vec<RiskSignal>,
    pub policy: EscalationPolicy,
}

/// Fold independent signals into one level. The strongest signal wins;
/// `High` reported by two or more distinct sources escalates to `Critical`.
pub fn combine_signals(signals: Vec<RiskSignal>) -> RiskAssessment {
    let max = signals
        .iter()
        .map(|s| s.level)
        .max()
        .unwrap_or(RiskLevel::None);

    let high_sources: HashSet<RiskSource> = signals
        .iter()
        .filter(|s| s.level == RiskLevel::High)
        .map(|s| s.source)
        .collect();

    let level = if max == RiskLevel::High && high_sources.len() >= 2 {
        RiskLevel::Critical
    } else {
        max
    };

    RiskAssessment {
        level,
        policy: escalation_policy(level),
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(source: RiskSource, level: RiskLevel) -> RiskSignal {
        RiskSignal {
            source,
            level,
            detail: String::new(),
        }
    }

    #[test]
    fn score_buckets_match_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::None);
        assert_eq!(RiskLevel::from_score(0.2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.85), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(7.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(f64::NAN), RiskLevel::None);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::Critical.raised(), RiskLevel::Critical);
        assert_eq!(RiskLevel::Medium.raised(), RiskLevel::High);
    }

    #[test]
    fn policy_table() {
        let critical = escalation_policy(RiskLevel::Critical);
        assert_eq!(critical.action, EscalationAction::CrisisProtocol);
        assert_eq!(critical.response_sla_minutes, Some(15));
        assert!(critical.requires_human);
        assert_eq!(
            escalation_policy(RiskLevel::Low).response_sla_minutes,
            Some(10_080)
        );
        assert!(!RiskLevel::Medium.requires_human());
        assert!(RiskLevel::High.requires_human());
    }

    #[test]
    fn empty_signals_are_no_risk() {
        let assessment = combine_signals(Vec::new());
        assert_eq!(assessment.level, RiskLevel::None);
        assert_eq!(assessment.policy.action, EscalationAction::None);
    }

    #[test]
    fn strongest_signal_wins() {
        let assessment = combine_signals(vec![
            signal(RiskSource::Assessment, RiskLevel::Low),
            signal(RiskSource::SafetyFilter, RiskLevel::Medium),
        ]);
        assert_eq!(assessment.level, RiskLevel::Medium);
    }

    #[test]
    fn corroborated_high_escalates_to_critical() {
        let assessment = combine_signals(vec![
            signal(RiskSource::Assessment, RiskLevel::High),
            signal(RiskSource::SafetyFilter, RiskLevel::High),
        ]);
        assert_eq!(assessment.level, RiskLevel::Critical);
    }

    #[test]
    fn high_from_two_instruments_is_one_source() {
        let mut phq9 = signal(RiskSource::Assessment, RiskLevel::High);
        phq9.detail = "phq9 21 (severe)".to_string();
        let mut gad7 = signal(RiskSource::Assessment, RiskLevel::High);
        gad7.detail = "gad7 18 (severe)".to_string();
        let assessment = combine_signals(vec![phq9, gad7]);
        assert_eq!(assessment.level, RiskLevel::High);
        assert_eq!(assessment.signals.len(), 2);
    }

    #[test]
    fn repeated_high_from_one_source_does_not_escalate() {
        let assessment = combine_signals(vec![
            signal(RiskSource::SafetyFilter, RiskLevel::High),
            signal(RiskSource::SafetyFilter, RiskLevel::High),
        ]);
        assert_eq!(assessment.level, RiskLevel::High);
    }
}
