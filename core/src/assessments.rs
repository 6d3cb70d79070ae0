//! Standardised questionnaire scoring.
//!
//! An [`Instrument`] is a static table: item ranges, reverse-scored items,
//! severity bands and critical items. Scoring never guesses; a missing or
//! out-of-range answer is a validation error.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};
use crate::risk::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemSpec {
    pub id: String,
    pub min: u8,
    pub max: u8,
    #[serde(default)]
    pub reverse_scored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SeverityBand {
    pub label: String,
    pub min_score: u32,
    pub max_score: u32,
    pub risk: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub items: Vec<ItemSpec>,
    pub bands: Vec<SeverityBand>,
    /// Items where any non-zero answer forces `Critical` risk.
    #[serde(default)]
    pub critical_items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssessmentResponse {
    pub instrument: String,
    pub answers: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssessmentResult {
    pub instrument: String,
    pub total: u32,
    pub max_total: u32,
    pub band: String,
    pub risk: RiskLevel,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub critical_flags: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

fn item(id: &str, min: u8, max: u8) -> ItemSpec {
    ItemSpec {
        id: id.to_string(),
        min,
        max,
        reverse_scored: false,
    }
}

fn band(label: &str, min_score: u32, max_score: u32, risk: RiskLevel) -> SeverityBand {
    SeverityBand {
        label: label.to_string(),
        min_score,
        max_score,
        risk,
    }
}

fn numbered_items(prefix: &str, count: usize, min: u8, max: u8) -> Vec<ItemSpec> {
    (1..=count)
        .map(|n| item(&format!("{prefix}_{n}"), min, max))
        .collect()
}

pub fn builtin_instruments() -> Vec<Instrument> {
    let mut pss_items = numbered_items("pss4", 4, 0, 4);
    pss_items[1].reverse_scored = true;
    pss_items[2].reverse_scored = true;

    vec![
        Instrument {
            code: "phq9".to_string(),
            name: "Patient Health Questionnaire (PHQ-9)".to_string(),
            items: numbered_items("phq9", 9, 0, 3),
            bands: vec![
                band("minimal", 0, 4, RiskLevel::None),
                band("mild", 5, 9, RiskLevel::Low),
                band("moderate", 10, 14, RiskLevel::Medium),
                band("moderately_severe", 15, 19, RiskLevel::High),
                band("severe", 20, 27, RiskLevel::High),
            ],
            critical_items: vec!["phq9_9".to_string()],
        },
        Instrument {
            code: "gad7".to_string(),
            name: "Generalized Anxiety Disorder scale (GAD-7)".to_string(),
            items: numbered_items("gad7", 7, 0, 3),
            bands: vec![
                band("minimal", 0, 4, RiskLevel::None),
                band("mild", 5, 9, RiskLevel::Low),
                band("moderate", 10, 14, RiskLevel::Medium),
                band("severe", 15, 21, RiskLevel::High),
            ],
            critical_items: Vec::new(),
        },
        Instrument {
            code: "readiness".to_string(),
            name: "Readiness ruler".to_string(),
            items: vec![item("importance", 0, 10), item("confidence", 0, 10)],
            bands: vec![
                band("low", 0, 9, RiskLevel::Low),
                band("medium", 10, 15, RiskLevel::None),
                band("high", 16, 20, RiskLevel::None),
            ],
            critical_items: Vec::new(),
        },
        Instrument {
            code: "pss4".to_string(),
            name: "Perceived Stress Scale (PSS-4)".to_string(),
            items: pss_items,
            bands: vec![
                band("low", 0, 5, RiskLevel::None),
                band("moderate", 6, 10, RiskLevel::Low),
                band("high", 11, 16, RiskLevel::Medium),
            ],
            critical_items: Vec::new(),
        },
    ]
}

impl Instrument {
    pub fn max_total(&self) -> u32 {
        self.items.iter().map(|i| u32::from(i.max)).sum()
    }

    pub fn min_total(&self) -> u32 {
        self.items.iter().map(|i| u32::from(i.min)).sum()
    }

    /// Structural checks run before an instrument is accepted into a registry.
    pub fn validate(&self) -> CoreResult<()> {
        if self.code.trim().is_empty() {
            return Err(CoreError::validation("code", "instrument code must not be empty"));
        }
        if self.items.is_empty() {
            return Err(CoreError::validation("items", "instrument needs at least one item"));
        }
        for spec in &self.items {
            if spec.min > spec.max {
                return Err(CoreError::validation(
                    format!("items.{}", spec.id),
                    format!("min {} exceeds max {}", spec.min, spec.max),
                ));
            }
        }
        for critical in &self.critical_items {
            if !self.items.iter().any(|i| &i.id == critical) {
                return Err(CoreError::validation(
                    "critical_items",
                    format!("critical item '{critical}' is not an item of this instrument"),
                ));
            }
        }

        let mut bands: Vec<&SeverityBand> = self.bands.iter().collect();
        bands.sort_by_key(|b| b.min_score);
        // Last score covered so far; `None` until the first band.
        let mut covered: Option<u32> = None;
        for b in &bands {
            if b.min_score > b.max_score {
                return Err(CoreError::validation(
                    format!("bands.{}", b.label),
                    "band min_score exceeds max_score",
                ));
            }
            let expected = match covered {
                None => Some(self.min_total()),
                Some(last) => last.checked_add(1),
            };
            if expected != Some(b.min_score) {
                let expected = expected.map_or_else(|| "none".to_string(), |e| e.to_string());
                return Err(CoreError::validation(
                    format!("bands.{}", b.label),
                    format!(
                        "bands must be contiguous: expected start {expected}, got {}",
                        b.min_score
                    ),
                ));
            }
            covered = Some(b.max_score);
        }
        if covered != Some(self.max_total()) {
            return Err(CoreError::validation(
                "bands",
                format!("bands must cover exactly {}..={}", self.min_total(), self.max_total()),
            ));
        }
        Ok(())
    }

    pub fn band_for(&self, total: u32) -> Option<&SeverityBand> {
        self.bands
            .iter()
            .find(|b| (b.min_score..=b.max_score).contains(&total))
    }

    pub fn score(
        &self,
        response: &AssessmentResponse,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<AssessmentResult> {
        if let Some(unknown) = response
            .answers
            .keys()
            .find(|k| !self.items.iter().any(|i| &i.id == *k))
        {
            return Err(CoreError::validation(
                format!("answers.{unknown}"),
                format!("'{unknown}' is not an item of instrument '{}'", self.code),
            ));
        }

        let mut total = 0u32;
        let mut critical_flags = Vec::new();
        for spec in &self.items {
            let value = *response.answers.get(&spec.id).ok_or_else(|| {
                CoreError::validation(format!("answers.{}", spec.id), "answer is missing")
            })?;
            if value < spec.min || value > spec.max {
                return Err(CoreError::validation(
                    format!("answers.{}", spec.id),
                    format!("value {value} outside {}..={}", spec.min, spec.max),
                ));
            }
            let contribution = if spec.reverse_scored {
                spec.max - value + spec.min
            } else {
                value
            };
            total += u32::from(contribution);
            if value > 0 && self.critical_items.contains(&spec.id) {
                critical_flags.push(spec.id.clone());
            }
        }

        let band = self.band_for(total).ok_or_else(|| {
            CoreError::validation("bands", format!("no severity band covers total {total}"))
        })?;
        let risk = if critical_flags.is_empty() {
            band.risk
        } else {
            RiskLevel::Critical
        };

        Ok(AssessmentResult {
            instrument: self.code.clone(),
            total,
            max_total: self.max_total(),
            band: band.label.clone(),
            risk,
            critical_flags,
            completed_at,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: HashMap<String, Instrument>,
}

impl InstrumentRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for instrument in builtin_instruments() {
            registry.instruments.insert(instrument.code.clone(), instrument);
        }
        registry
    }

    /// Codes are stored lowercased so `get` finds them whatever the caller's casing.
    pub fn register(&mut self, mut instrument: Instrument) -> CoreResult<()> {
        instrument.code = instrument.code.trim().to_lowercase();
        instrument.validate()?;
        if self.instruments.contains_key(&instrument.code) {
            return Err(CoreError::conflict(format!(
                "instrument '{}' already registered",
                instrument.code
            )));
        }
        self.instruments.insert(instrument.code.clone(), instrument);
        Ok(())
    }

    pub fn get(&self, code: &str) -> CoreResult<&Instrument> {
        self.instruments
            .get(&code.trim().to_lowercase())
            .ok_or_else(|| CoreError::not_found(format!("instrument '{code}'")))
    }

    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.instruments.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Resolve and score in one step.
    pub fn score(
        &self,
        response: &AssessmentResponse,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<AssessmentResult> {
        self.get(&response.instrument)?.score(response, completed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(prefix: &str, values: &[u8]) -> BTreeMap<String, u8> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{prefix}_{}", i + 1), *v))
            .collect()
    }

    fn respond(instrument: &str, answers: BTreeMap<String, u8>) -> AssessmentResponse {
        AssessmentResponse {
            instrument: instrument.to_string(),
            answers,
        }
    }

    #[test]
    fn builtin_instruments_are_structurally_valid() {
        for instrument in builtin_instruments() {
            instrument
                .validate()
                .unwrap_or_else(|e| panic!("{} invalid: {e}", instrument.code));
        }
    }

    #[test]
    fn phq9_moderate_band() {
        let registry = InstrumentRegistry::with_builtins();
        let result = registry
            .score(
                &respond("phq9", answers("phq9", &[2, 2, 2, 1, 1, 1, 1, 1, 0])),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(result.total, 11);
        assert_eq!(result.max_total, 27);
        assert_eq!(result.band, "moderate");
        assert_eq!(result.risk, RiskLevel::Medium);
        assert!(result.critical_flags.is_empty());
    }

    #[test]
    fn phq9_item_nine_forces_critical() {
        let registry = InstrumentRegistry::with_builtins();
        let result = registry
            .score(
                &respond("phq9", answers("phq9", &[0, 0, 0, 0, 0, 0, 0, 0, 1])),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(result.band, "minimal");
        assert_eq!(result.risk, RiskLevel::Critical);
        assert_eq!(result.critical_flags, vec!["phq9_9".to_string()]);
    }

    #[test]
    fn pss4_reverse_scores_items_two_and_three() {
        let registry = InstrumentRegistry::with_builtins();
        // raw 4,0,0,4 -> 4 + 4 + 4 + 4
        let result = registry
            .score(&respond("pss4", answers("pss4", &[4, 0, 0, 4])), Utc::now())
            .unwrap();
        assert_eq!(result.total, 16);
        assert_eq!(result.band, "high");
    }

    #[test]
    fn missing_answer_names_the_item() {
        let registry = InstrumentRegistry::with_builtins();
        let err = registry
            .score(&respond("gad7", answers("gad7", &[1, 1, 1])), Utc::now())
            .expect_err("incomplete response must fail");
        match err {
            CoreError::Validation { field, .. } => assert_eq!(field, "answers.gad7_4"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_answers_fail_on_first_item() {
        let registry = InstrumentRegistry::with_builtins();
        match registry.score(&respond("gad7", BTreeMap::new()), Utc::now()) {
            Err(CoreError::Validation { field, .. }) => assert_eq!(field, "answers.gad7_1"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_and_unknown_items_are_rejected() {
        let registry = InstrumentRegistry::with_builtins();
        let mut bad = answers("gad7", &[0, 0, 0, 0, 0, 0, 4]);
        assert!(registry.score(&respond("gad7", bad.clone()), Utc::now()).is_err());

        bad.insert("gad7_7".to_string(), 0);
        bad.insert("gad7_8".to_string(), 0);
        match registry.score(&respond("gad7", bad), Utc::now()) {
            Err(CoreError::Validation { field, .. }) => assert_eq!(field, "answers.gad7_8"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_instrument_is_not_found() {
        let registry = InstrumentRegistry::with_builtins();
        assert!(matches!(
            registry.get("bdi"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn register_rejects_gapped_bands() {
        let mut registry = InstrumentRegistry::default();
        let instrument = Instrument {
            code: "mood3".to_string(),
            name: "Mood".to_string(),
            items: numbered_items("mood3", 3, 0, 2),
            bands: vec![
                band("low", 0, 2, RiskLevel::None),
                band("high", 4, 6, RiskLevel::Medium),
            ],
            critical_items: Vec::new(),
        };
        assert!(registry.register(instrument).is_err());
    }

    #[test]
    fn register_accepts_custom_instrument_once() {
        let mut registry = InstrumentRegistry::default();
        let instrument = Instrument {
            code: "mood3".to_string(),
            name: "Mood".to_string(),
            items: numbered_items("mood3", 3, 0, 2),
            bands: vec![
                band("low", 0, 3, RiskLevel::None),
                band("high", 4, 6, RiskLevel::Medium),
            ],
            critical_items: Vec::new(),
        };
        registry.register(instrument.clone()).unwrap();
        assert!(matches!(
            registry.register(instrument),
            Err(CoreError::Conflict { .. })
        ));
        assert_eq!(registry.codes(), vec!["mood3"]);
    }

    fn mood3(code: &str, bands: Vec<SeverityBand>) -> Instrument {
        Instrument {
            code: code.to_string(),
            name: "Mood".to_string(),
            items: numbered_items("mood3", 3, 0, 2),
            bands,
            critical_items: Vec::new(),
        }
    }

    #[test]
    fn mixed_case_code_is_found_after_register() {
        let mut registry = InstrumentRegistry::default();
        let bands = vec![
            band("low", 0, 3, RiskLevel::None),
            band("high", 4, 6, RiskLevel::Medium),
        ];
        registry.register(mood3(" Mood3 ", bands.clone())).unwrap();
        assert_eq!(registry.codes(), vec!["mood3"]);
        assert_eq!(registry.get("MOOD3").unwrap().code, "mood3");

        let response = respond("Mood3", answers("mood3", &[2, 2, 1]));
        let result = registry.score(&response, Utc::now()).unwrap();
        assert_eq!(result.band, "high");

        assert!(matches!(
            registry.register(mood3("mood3", bands)),
            Err(CoreError::Conflict { .. })
        ));
    }

    #[test]
    fn bands_reaching_u32_max_are_rejected_without_overflow() {
        let mut registry = InstrumentRegistry::default();
        let past_max = mood3(
            "mood3",
            vec![
                band("low", 0, 3, RiskLevel::None),
                band("high", 4, u32::MAX, RiskLevel::Medium),
            ],
        );
        assert!(matches!(
            registry.register(past_max),
            Err(CoreError::Validation { .. })
        ));

        let after_max = mood3(
            "mood3",
            vec![
                band("all", 0, u32::MAX, RiskLevel::None),
                band("more", 5, 6, RiskLevel::Medium),
            ],
        );
        assert!(registry.register(after_max).is_err());
        assert!(registry.codes().is_empty());
    }
}
