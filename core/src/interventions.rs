use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};
use crate::risk::RiskLevel;
use crate::stages::Stage;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InterventionPack {
    pub id: String,
    pub title: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub min_risk: RiskLevel,
    pub max_risk: RiskLevel,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MatchCriteria {
    pub stage: Stage,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PackMatch {
    pub pack_id: String,
    pub title: String,
    pub score: i32,
}

fn pack(
    id: &str,
    title: &str,
    stages: &[Stage],
    (min_risk, max_risk): (RiskLevel, RiskLevel),
    tags: &[&str],
    steps: &[&str],
    priority: i32,
) -> InterventionPack {
    InterventionPack {
        id: id.to_string(),
        title: title.to_string(),
        stages: stages.to_vec(),
        min_risk,
        max_risk,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        steps: steps.iter().map(|s| s.to_string()).collect(),
        priority,
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterventionCatalog {
    packs: Vec<InterventionPack>,
}

impl InterventionCatalog {
    pub fn with_defaults() -> Self {
        use RiskLevel::{Critical, High, Low, Medium};
        use Stage::*;

        let packs = vec![
            pack(
                "awareness_building",
                "Noticing the pattern",
                &[Precontemplation],
                (RiskLevel::None, Medium),
                &["awareness", "reflection"],
                &[
                    "Write down one moment this week when the habit showed up.",
                    "Note what happened right before it.",
                ],
                2,
            ),
            pack(
                "decisional_balance",
                "Weighing pros and cons",
                &[Precontemplation, Contemplation],
                (RiskLevel::None, Medium),
                &["ambivalence", "motivation"],
                &[
                    "List what you gain from changing and what you gain from staying the same.",
                    "Circle the item that matters most to you.",
                ],
                3,
            ),
            pack(
                "implementation_intention",
                "If-then planning",
                &[Preparation, Action],
                (RiskLevel::None, Medium),
                &["planning", "goal"],
                &[
                    "Pick one situation: \"If it is 7pm on a weekday...\"",
                    "Attach one concrete action: \"...then I walk for 15 minutes.\"",
                ],
                3,
            ),
            pack(
                "habit_tracking",
                "Daily habit check-ins",
                &[Action, Maintenance],
                (RiskLevel::None, Low),
                &["tracking", "habit", "streak"],
                &[
                    "Check in once a day, even on missed days.",
                    "Review the week every Sunday.",
                ],
                2,
            ),
            pack(
                "relapse_prevention",
                "Planning for slips",
                &[Action, Maintenance, Preparation, Contemplation],
                (Low, High),
                &["relapse", "craving", "slip"],
                &[
                    "Name your top three high-risk situations.",
                    "For each, pick a coping response you can do in under five minutes.",
                    "Treat a slip as data, not failure.",
                ],
                4,
            ),
            pack(
                "crisis_grounding",
                "Grounding and getting support",
                &Stage::ALL,
                (High, Critical),
                &["crisis", "grounding"],
                &[
                    "Name five things you can see and four you can hear.",
                    "Contact someone you trust or your local crisis line now.",
                    "Your coach has been notified.",
                ],
                10,
            ),
        ];
        Self { packs }
    }

    pub fn packs(&self) -> &[InterventionPack] {
        &self.packs
    }

    pub fn get(&self, id: &str) -> Option<&InterventionPack> {
        self.packs.iter().find(|p| p.id == id)
    }

    pub fn insert(&mut self, pack: InterventionPack) -> CoreResult<()> {
        if pack.id.trim().is_empty() {
            return Err(CoreError::validation("id", "pack id must not be empty"));
        }
        if pack.stages.is_empty() {
            return Err(CoreError::validation("stages", "pack must target at least one stage"));
        }
        if pack.steps.is_empty() {
            return Err(CoreError::validation("steps", "pack must have at least one step"));
        }
        if pack.min_risk > pack.max_risk {
            return Err(CoreError::validation("min_risk", "min_risk exceeds max_risk"));
        }
        if self.get(&pack.id).is_some() {
            return Err(CoreError::conflict(format!("pack '{}' already exists", pack.id)));
        }
        self.packs.push(pack);
        Ok(())
    }

    /// Eligible packs, best first. Ties break on pack id.
    pub fn match_packs(&self, criteria: &MatchCriteria) -> Vec<PackMatch> {
        let wanted: Vec<String> = criteria
            .tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .collect();

        let mut matches: Vec<PackMatch> = self
            .packs
            .iter()
            .filter(|p| p.stages.contains(&criteria.stage))
            .filter(|p| p.min_risk <= criteria.risk && criteria.risk <= p.max_risk)
            .map(|p| {
                let overlap = p
                    .tags
                    .iter()
                    .filter(|t| wanted.contains(&t.to_lowercase()))
                    .count() as i32;
                PackMatch {
                    pack_id: p.id.clone(),
                    title: p.title.clone(),
                    score: p.priority + 2 * overlap,
                }
            })
            .collect();

        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.pack_id.cmp(&b.pack_id)));
        matches
    }

    pub fn best_match(&self, criteria: &MatchCriteria) -> Option<&InterventionPack> {
        self.match_packs(criteria)
            .first()
            .and_then(|m| self.get(&m.pack_id))
    }
}
