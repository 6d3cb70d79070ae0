//! Layered safety filtering for user messages and agent replies.
//!
//! Layers run cheapest first:
//! 1. keyword rules (regex + fuzzy token match),
//! 2. retrieval against known risky exemplars (hashing embeddings),
//! 3. an optional pluggable classifier (the LLM seam).
//!
//! Keyword evidence is never overridden by a later layer. Classifier failures
//! are logged and ignored.

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::embedding::{
    DEFAULT_DIMENSIONS, cosine_similarity, hashing_embedding, normalize_text, round_score,
    tokenize_ascii,
};
use crate::error::{CoreError, CoreResult};
use crate::risk::{RiskLevel, RiskSignal, RiskSource};

/// Shortest single-word pattern eligible for fuzzy matching.
const FUZZY_MIN_PATTERN_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    SelfHarm,
    Violence,
    MedicalEmergency,
    Medication,
    ClinicalClaim,
    Abuse,
    EatingDisorder,
    Substance,
}

impl SafetyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyCategory::SelfHarm => "self_harm",
            SafetyCategory::Violence => "violence",
            SafetyCategory::MedicalEmergency => "medical_emergency",
            SafetyCategory::Medication => "medication",
            SafetyCategory::ClinicalClaim => "clinical_claim",
            SafetyCategory::Abuse => "abuse",
            SafetyCategory::EatingDisorder => "eating_disorder",
            SafetyCategory::Substance => "substance",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KeywordRule {
    pub pattern: String,
    pub category: SafetyCategory,
    pub severity: RiskLevel,
    /// Match only on word boundaries (ignored for regex rules).
    #[serde(default = "default_true")]
    pub whole_word: bool,
    /// Treat `pattern` as a regular expression instead of a literal phrase.
    #[serde(default)]
    pub is_regex: bool,
}

impl KeywordRule {
    fn phrase(pattern: &str, category: SafetyCategory, severity: RiskLevel) -> Self {
        Self {
            pattern: pattern.to_string(),
            category,
            severity,
            whole_word: true,
            is_regex: false,
        }
    }

    fn regex(pattern: &str, category: SafetyCategory, severity: RiskLevel) -> Self {
        Self {
            pattern: pattern.to_string(),
            category,
            severity,
            whole_word: false,
            is_regex: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Exemplar {
    pub text: String,
    pub category: SafetyCategory,
    pub severity: RiskLevel,
}

impl Exemplar {
    fn new(text: &str, category: SafetyCategory, severity: RiskLevel) -> Self {
        Self {
            text: text.to_string(),
            category,
            severity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SafetyConfig {
    pub keyword_rules: Vec<KeywordRule>,
    pub exemplars: Vec<Exemplar>,
    /// Minimum cosine similarity for a retrieval match.
    pub similarity_threshold: f64,
    /// Minimum Jaro-Winkler similarity for a fuzzy keyword match.
    pub fuzzy_threshold: f64,
    pub enable_retrieval: bool,
    pub enable_classifier: bool,
    /// The classifier runs when nothing matched, or when the strongest match
    /// so far is at least this level.
    pub classifier_min_level: RiskLevel,
    pub block_at: RiskLevel,
    pub escalate_at: RiskLevel,
    /// Rules applied to agent replies instead of `keyword_rules`.
    pub output_rules: Vec<KeywordRule>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        use RiskLevel::{Critical, High, Medium};
        use SafetyCategory::*;

        let keyword_rules = vec![
            KeywordRule::phrase("kill myself", SelfHarm, Critical),
            KeywordRule::phrase("suicide", SelfHarm, Critical),
            KeywordRule::phrase("suicidal", SelfHarm, Critical),
            KeywordRule::phrase("end my life", SelfHarm, Critical),
            KeywordRule::phrase("want to die", SelfHarm, Critical),
            KeywordRule::phrase("better off dead", SelfHarm, Critical),
            KeywordRule::phrase("hurt myself", SelfHarm, High),
            KeywordRule::phrase("self harm", SelfHarm, High),
            KeywordRule::phrase("cutting myself", SelfHarm, High),
            KeywordRule::phrase("hurt someone", Violence, High),
            KeywordRule::regex(r"\bkill (him|her|them)\b", Violence, High),
            KeywordRule::phrase("overdose", Substance, Critical),
            KeywordRule::phrase("overdosed", Substance, Critical),
            KeywordRule::phrase("blackout drunk", Substance, Medium),
            KeywordRule::regex(r"\bcan'?t breathe\b", MedicalEmergency, Critical),
            KeywordRule::phrase("chest pain", MedicalEmergency, High),
            KeywordRule::phrase("binge and purge", EatingDisorder, High),
            KeywordRule::phrase("starving myself", EatingDisorder, High),
            KeywordRule::phrase("make myself throw up", EatingDisorder, High),
            KeywordRule::phrase("being abused", Abuse, High),
            KeywordRule::regex(r"\b(he|she|they) (hits|beats) me\b", Abuse, High),
            KeywordRule::phrase("relapsed", Substance, Medium),
        ];

        let exemplars = vec![
            Exemplar::new("i don't see a reason to keep going", SelfHarm, Critical),
            Exemplar::new("nobody would miss me if i was gone", SelfHarm, Critical),
            Exemplar::new("i have been thinking about ending it all", SelfHarm, Critical),
            Exemplar::new("i am afraid of what i might do to him", Violence, High),
            Exemplar::new("i have not eaten in days on purpose", EatingDisorder, High),
            Exemplar::new("i took all my pills at once", Substance, Critical),
            Exemplar::new("he will hurt me if i tell anyone", Abuse, High),
        ];

        let output_rules = vec![
            KeywordRule::regex(
                r"\b\d+(\.\d+)?\s?(mg|milligrams?|ml|pills?|tablets?)\b",
                Medication,
                Critical,
            ),
            KeywordRule::phrase("increase your dose", Medication, Critical),
            KeywordRule::phrase("stop taking your medication", Medication, Critical),
            KeywordRule::regex(
                concat!(
                    r"\byou (have|suffer from) ",
                    r"(depression|anxiety|bipolar|ptsd|adhd|an eating disorder)\b"
                ),
                ClinicalClaim,
                Critical,
            ),
            KeywordRule::phrase("i diagnose", ClinicalClaim, Critical),
            KeywordRule::phrase("guaranteed cure", ClinicalClaim, High),
        ];

        Self {
            keyword_rules,
            exemplars,
            similarity_threshold: 0.62,
            fuzzy_threshold: 0.94,
            enable_retrieval: true,
            enable_classifier: true,
            classifier_min_level: Medium,
            block_at: Critical,
            escalate_at: High,
            output_rules,
        }
    }
}

impl SafetyConfig {
    /// Parse a JSON config. Omitted fields keep their built-in defaults.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let config: SafetyConfig = serde_json::from_str(raw)
            .map_err(|e| CoreError::validation("safety_config", format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("fuzzy_threshold", self.fuzzy_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(CoreError::validation(
                    field,
                    format!("threshold {value} must be within (0, 1]"),
                ));
            }
        }
        if self.escalate_at < RiskLevel::Medium {
            return Err(CoreError::validation(
                "escalate_at",
                "escalate_at must be medium or higher",
            ));
        }
        if self.escalate_at > self.block_at {
            return Err(CoreError::validation(
                "escalate_at",
                "escalate_at must not exceed block_at",
            ));
        }
        let rules = self
            .keyword_rules
            .iter()
            .map(|r| ("keyword_rules", r))
            .chain(self.output_rules.iter().map(|r| ("output_rules", r)));
        for (field, rule) in rules {
            if rule.pattern.trim().is_empty() {
                return Err(CoreError::validation(field, "rule pattern must not be empty"));
            }
        }
        if self.exemplars.iter().any(|e| e.text.trim().is_empty()) {
            return Err(CoreError::validation("exemplars", "exemplar text must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLayer {
    Keyword,
    Retrieval,
    Classifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Text written by the user.
    #[default]
    Inbound,
    /// Text produced by an agent, checked before delivery.
    Outbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SafetyMatch {
    pub layer: SafetyLayer,
    pub category: SafetyCategory,
    pub severity: RiskLevel,
    pub evidence: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    Allow,
    Flag,
    Escalate,
    Block,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SafetyVerdict {
    pub action: SafetyAction,
    pub risk: RiskLevel,
    pub direction: Direction,
    pub matches: Vec<SafetyMatch>,
    pub layers_run: Vec<SafetyLayer>,
}

impl SafetyVerdict {
    pub fn is_allowed(&self) -> bool {
        self.action == SafetyAction::Allow
    }

    pub fn categories(&self) -> Vec<SafetyCategory> {
        let mut out: Vec<SafetyCategory> = Vec::new();
        for m in &self.matches {
            if !out.contains(&m.category) {
                out.push(m.category);
            }
        }
        out
    }

    pub fn to_risk_signal(&self) -> RiskSignal {
        let detail = self
            .categories()
            .into_iter()
            .map(SafetyCategory::as_str)
            .collect::<Vec<_>>()
            .join(",");
        RiskSignal {
            source: RiskSource::SafetyFilter,
            level: self.risk,
            detail,
        }
    }
}

/// Pluggable last layer. Implementations typically call a hosted model.
pub trait SafetyClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, text: &str, direction: Direction) -> CoreResult<Option<SafetyMatch>>;
}

/// Classifier with no opinion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

impl SafetyClassifier for NoopClassifier {
    fn name(&self) -> &str {
        "noop"
    }

    fn classify(&self, _text: &str, _direction: Direction) -> CoreResult<Option<SafetyMatch>> {
        Ok(None)
    }
}

/// Classifier returning a fixed answer. Useful for replaying a recorded
/// model decision and for exercising the pipeline offline.
#[derive(Debug, Clone)]
pub enum StaticClassifier {
    Flag {
        category: SafetyCategory,
        severity: RiskLevel,
    },
    Fail(String),
}

impl SafetyClassifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    fn classify(&self, _text: &str, _direction: Direction) -> CoreResult<Option<SafetyMatch>> {
        match self {
            StaticClassifier::Flag { category, severity } => Ok(Some(SafetyMatch {
                layer: SafetyLayer::Classifier,
                category: *category,
                severity: *severity,
                evidence: "static".to_string(),
                score: 1.0,
            })),
            StaticClassifier::Fail(message) => Err(CoreError::Classifier(message.clone())),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: KeywordRule,
    regex: Regex,
    /// Lowercased literal used for fuzzy matching; `None` for regex rules
    /// and multi-word phrases.
    fuzzy_token: Option<String>,
}

fn compile_rules(rules: &[KeywordRule], field: &str) -> CoreResult<Vec<CompiledRule>> {
    rules
        .iter()
        .map(|rule| {
            let normalized = normalize_text(&rule.pattern);
            let source = if rule.is_regex {
                format!("(?i){}", rule.pattern)
            } else if rule.whole_word {
                format!(r"\b{}\b", regex::escape(&normalized))
            } else {
                regex::escape(&normalized)
            };
            let regex = Regex::new(&source).map_err(|e| {
                let message = format!("rule '{}' does not compile: {e}", rule.pattern);
                CoreError::validation(field, message)
            })?;
            let fuzzy_token = (!rule.is_regex
                && !normalized.contains(' ')
                && normalized.chars().count() >= FUZZY_MIN_PATTERN_LEN)
                .then_some(normalized);
            Ok(CompiledRule {
                rule: rule.clone(),
                regex,
                fuzzy_token,
            })
        })
        .collect()
}

fn strongest(matches: &[SafetyMatch]) -> RiskLevel {
    matches
        .iter()
        .map(|m| m.severity)
        .max()
        .unwrap_or(RiskLevel::None)
}

#[derive(Debug, Clone)]
pub struct SafetyPipeline {
    config: SafetyConfig,
    inbound_rules: Vec<CompiledRule>,
    outbound_rules: Vec<CompiledRule>,
    exemplar_embeddings: Vec<Vec<f64>>,
}

impl SafetyPipeline {
    pub fn new(config: SafetyConfig) -> CoreResult<Self> {
        config.validate()?;
        let inbound_rules = compile_rules(&config.keyword_rules, "keyword_rules")?;
        let outbound_rules = compile_rules(&config.output_rules, "output_rules")?;
        let exemplar_embeddings = config
            .exemplars
            .iter()
            .map(|e| hashing_embedding(&e.text, DEFAULT_DIMENSIONS))
            .collect();
        Ok(Self {
            config,
            inbound_rules,
            outbound_rules,
            exemplar_embeddings,
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        text: &str,
        direction: Direction,
        classifier: Option<&dyn SafetyClassifier>,
    ) -> SafetyVerdict {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return SafetyVerdict {
                action: SafetyAction::Allow,
                risk: RiskLevel::None,
                direction,
                matches: Vec::new(),
                layers_run: Vec::new(),
            };
        }

        let mut layers_run = vec![SafetyLayer::Keyword];
        let rules = match direction {
            Direction::Inbound => &self.inbound_rules,
            Direction::Outbound => &self.outbound_rules,
        };
        let mut matches = self.keyword_layer(rules, &normalized);

        if direction == Direction::Inbound
            && self.config.enable_retrieval
            && strongest(&matches) < self.config.escalate_at
        {
            layers_run.push(SafetyLayer::Retrieval);
            if let Some(hit) = self.retrieval_layer(&normalized) {
                matches.push(hit);
            }
        }

        if let Some(classifier) = classifier.filter(|_| self.config.enable_classifier) {
            let current = strongest(&matches);
            if matches.is_empty() || current >= self.config.classifier_min_level {
                layers_run.push(SafetyLayer::Classifier);
                match classifier.classify(&normalized, direction) {
                    Ok(Some(hit)) => matches.push(SafetyMatch {
                        layer: SafetyLayer::Classifier,
                        ..hit
                    }),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!(
                            classifier = classifier.name(),
                            error = %err,
                            "safety classifier failed; continuing without it"
                        );
                    }
                }
            }
        }

        let risk = strongest(&matches);
        let action = self.action_for(risk, direction);

        let categories: Vec<&str> = matches.iter().map(|m| m.category.as_str()).collect();
        match action {
            SafetyAction::Block | SafetyAction::Escalate => tracing::warn!(
                direction = ?direction,
                risk = risk.as_str(),
                action = ?action,
                categories = ?categories,
                "safety decision"
            ),
            SafetyAction::Flag => tracing::info!(
                direction = ?direction,
                risk = risk.as_str(),
                categories = ?categories,
                "safety decision"
            ),
            SafetyAction::Allow => tracing::debug!(direction = ?direction, "safety decision"),
        }

        SafetyVerdict {
            action,
            risk,
            direction,
            matches,
            layers_run,
        }
    }

    fn action_for(&self, risk: RiskLevel, direction: Direction) -> SafetyAction {
        if risk >= self.config.block_at {
            // user crisis text is escalated, never silently dropped
            match direction {
                Direction::Inbound => SafetyAction::Escalate,
                Direction::Outbound => SafetyAction::Block,
            }
        } else if risk >= self.config.escalate_at {
            SafetyAction::Escalate
        } else if risk > RiskLevel::None {
            SafetyAction::Flag
        } else {
            SafetyAction::Allow
        }
    }

    fn keyword_layer(&self, rules: &[CompiledRule], normalized: &str) -> Vec<SafetyMatch> {
        let tokens = tokenize_ascii(normalized);
        let mut matches = Vec::new();
        for compiled in rules {
            if let Some(found) = compiled.regex.find(normalized) {
                matches.push(SafetyMatch {
                    layer: SafetyLayer::Keyword,
                    category: compiled.rule.category,
                    severity: compiled.rule.severity,
                    evidence: found.as_str().to_string(),
                    score: 1.0,
                });
                continue;
            }

            let Some(pattern) = compiled.fuzzy_token.as_deref() else {
                continue;
            };
            let best = tokens
                .iter()
                .filter(|t| t.len() >= FUZZY_MIN_PATTERN_LEN)
                .map(|t| (t, strsim::jaro_winkler(t, pattern)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((token, similarity)) = best {
                if similarity >= self.config.fuzzy_threshold {
                    matches.push(SafetyMatch {
                        layer: SafetyLayer::Keyword,
                        category: compiled.rule.category,
                        severity: compiled.rule.severity,
                        evidence: format!("{token}~{pattern}"),
                        score: round_score(similarity),
                    });
                }
            }
        }
        matches
    }

    fn retrieval_layer(&self, normalized: &str) -> Option<SafetyMatch> {
        let query = hashing_embedding(normalized, DEFAULT_DIMENSIONS);
        self.config
            .exemplars
            .iter()
            .zip(self.exemplar_embeddings.iter())
            .map(|(exemplar, embedding)| (exemplar, cosine_similarity(&query, embedding)))
            .filter(|(_, score)| *score >= self.config.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(exemplar, score)| SafetyMatch {
                layer: SafetyLayer::Retrieval,
                category: exemplar.category,
                severity: exemplar.severity,
                evidence: exemplar.text.clone(),
                score: round_score(score),
            })
    }
}
