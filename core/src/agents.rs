use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::coaching::Escalation;
use crate::embedding::tokenize_ascii;
use crate::error::{CoreError, CoreResult};
use crate::interventions::{InterventionCatalog, InterventionPack, MatchCriteria};
use crate::knowledge::{KnowledgeBase, SearchHit};
use crate::risk::{RiskLevel, RiskSignal, RiskSource, combine_signals};
use crate::safety::{Direction, SafetyAction, SafetyClassifier, SafetyPipeline, SafetyVerdict};
use crate::stages::Stage;
use crate::tenants::TenantId;

/// Knowledge passages handed to a responder per turn.
pub const CONTEXT_HITS: usize = 3;

/// Sent instead of any agent reply the outbound filter blocks.
pub const SAFE_FALLBACK_TEXT: &str = "I'm not able to help with that here. \
If you are in danger or thinking about harming yourself, please contact your local \
emergency number or a crisis line right away. A member of our team can also follow up with you.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Coach,
    Assessment,
    Education,
    Motivation,
    Crisis,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Coach => "coach",
            AgentKind::Assessment => "assessment",
            AgentKind::Education => "education",
            AgentKind::Motivation => "motivation",
            AgentKind::Crisis => "crisis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SmallTalk,
    Question,
    Goal,
    Struggle,
    AssessmentRequest,
    Emergency,
}

const EMERGENCY_TERMS: &[&str] = &[
    "emergency",
    "crisis",
    "hurt myself",
    "can't go on",
    "end it all",
];
const ASSESSMENT_TERMS: &[&str] = &[
    "questionnaire",
    "assessment",
    "check in",
    "phq",
    "phq9",
    "gad",
    "gad7",
];
const STRUGGLE_TERMS: &[&str] = &["struggling", "relapsed", "craving", "slipped", "hard time"];
const GOAL_TERMS: &[&str] = &["goal", "plan", "want to", "start"];
const QUESTION_OPENERS: &[&str] = &["how", "what", "why", "when", "can"];

/// True when any term appears as a run of whole words.
fn contains_any(tokens: &[String], terms: &[&str]) -> bool {
    terms.iter().any(|term| {
        let needle = tokenize_ascii(term);
        !needle.is_empty() && tokens.windows(needle.len()).any(|w| w == needle.as_slice())
    })
}

/// Keyword intent detection on word tokens. Earlier categories win.
pub fn classify_intent(text: &str) -> Intent {
    let tokens = tokenize_ascii(text);
    if contains_any(&tokens, EMERGENCY_TERMS) {
        return Intent::Emergency;
    }
    if contains_any(&tokens, ASSESSMENT_TERMS) {
        return Intent::AssessmentRequest;
    }
    if contains_any(&tokens, STRUGGLE_TERMS) {
        return Intent::Struggle;
    }
    if contains_any(&tokens, GOAL_TERMS) {
        return Intent::Goal;
    }
    let first_word = tokens.first().map(String::as_str).unwrap_or("");
    if text.trim_end().ends_with('?') || QUESTION_OPENERS.contains(&first_word) {
        return Intent::Question;
    }
    Intent::SmallTalk
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoutingRule {
    pub agent: AgentKind,
    pub intents: Vec<Intent>,
    /// Empty means every stage.
    #[serde(default)]
    pub stages: Vec<Stage>,
    pub max_risk: RiskLevel,
}

impl RoutingRule {
    fn matches(&self, intent: Intent, stage: Stage, risk: RiskLevel) -> bool {
        self.intents.contains(&intent)
            && (self.stages.is_empty() || self.stages.contains(&stage))
            && risk <= self.max_risk
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RouteDecision {
    pub agent: AgentKind,
    pub intent: Intent,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoutingTable {
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        use Stage::*;

        let rule = |agent, intents: &[Intent], stages: &[Stage]| RoutingRule {
            agent,
            intents: intents.to_vec(),
            stages: stages.to_vec(),
            max_risk: RiskLevel::Critical,
        };
        Self {
            rules: vec![
                rule(AgentKind::Crisis, &[Intent::Emergency], &[]),
                rule(AgentKind::Assessment, &[Intent::AssessmentRequest], &[]),
                rule(AgentKind::Motivation, &[Intent::Struggle], &[]),
                rule(AgentKind::Motivation, &[Intent::Goal], &[Precontemplation, Contemplation]),
                rule(AgentKind::Coach, &[Intent::Goal], &[Preparation, Action, Maintenance]),
                rule(AgentKind::Education, &[Intent::Question], &[]),
                rule(AgentKind::Coach, &[Intent::SmallTalk], &[]),
            ],
        }
    }
}

impl RoutingTable {
    pub fn route(&self, intent: Intent, stage: Stage, risk: RiskLevel) -> RouteDecision {
        if risk >= RiskLevel::High {
            return RouteDecision {
                agent: AgentKind::Crisis,
                intent,
                reason: "risk_override".to_string(),
            };
        }
        match self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.matches(intent, stage, risk))
        {
            Some((idx, r)) => RouteDecision {
                agent: r.agent,
                intent,
                reason: format!("rule_{idx}"),
            },
            None => RouteDecision {
                agent: AgentKind::Coach,
                intent,
                reason: "fallback".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AgentRequest {
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub text: String,
    pub stage: Stage,
    /// Signals already stored for the user. A stored safety-filter signal
    /// is superseded by this turn's inbound verdict.
    #[serde(default)]
    pub signals: Vec<RiskSignal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AgentReply {
    pub agent: AgentKind,
    pub text: String,
    /// Knowledge documents the reply drew on.
    pub citations: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponderContext {
    pub hits: Vec<SearchHit>,
    pub pack: Option<InterventionPack>,
    pub risk: RiskLevel,
}

/// Produces the text of one agent turn. Hosted-model responders implement
/// this too; the core only ships templates.
pub trait AgentResponder: Send + Sync {
    fn kind(&self) -> AgentKind;

    fn respond(&self, req: &AgentRequest, ctx: &ResponderContext) -> CoreResult<AgentReply>;
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateResponder {
    kind: AgentKind,
}

impl TemplateResponder {
    pub fn new(kind: AgentKind) -> Self {
        Self { kind }
    }

    pub fn all() -> Vec<Box<dyn AgentResponder>> {
        [
            AgentKind::Coach,
            AgentKind::Assessment,
            AgentKind::Education,
            AgentKind::Motivation,
            AgentKind::Crisis,
        ]
        .into_iter()
        .map(|kind| Box::new(TemplateResponder::new(kind)) as Box<dyn AgentResponder>)
        .collect()
    }
}

fn first_step(ctx: &ResponderContext) -> Option<&str> {
    ctx.pack
        .as_ref()
        .and_then(|p| p.steps.first())
        .map(String::as_str)
}

impl AgentResponder for TemplateResponder {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn respond(&self, req: &AgentRequest, ctx: &ResponderContext) -> CoreResult<AgentReply> {
        let mut text = match self.kind {
            AgentKind::Crisis => {
                let mut text = String::from(
                    "It sounds like things are really hard right now, \
                     and you don't have to face this alone.",
                );
                if let Some(pack) = &ctx.pack {
                    for step in &pack.steps {
                        text.push(' ');
                        text.push_str(step);
                    }
                }
                text
            }
            AgentKind::Assessment => format!(
                "Let's do a short check-in so we can see how you're doing in the {} stage. \
                 Answer each question for the last two weeks.",
                req.stage.as_str()
            ),
            AgentKind::Education => match ctx.hits.first() {
                Some(hit) => format!(
                    "Here is something from our library, \"{}\": {}",
                    hit.title, hit.passage
                ),
                None => "I don't have material on that yet. \
                         Your coach can point you to a good resource."
                    .to_string(),
            },
            AgentKind::Motivation => {
                let mut text = String::from(
                    "Change rarely happens in a straight line, and noticing that is a step.",
                );
                if let Some(step) = first_step(ctx) {
                    text.push_str(" One thing to try: ");
                    text.push_str(step);
                }
                text
            }
            AgentKind::Coach => match first_step(ctx) {
                Some(step) => {
                    format!("Thanks for checking in. A next step that fits where you are: {step}")
                }
                None => {
                    "Thanks for checking in. What would you like to focus on today?".to_string()
                }
            },
        };

        if self.kind != AgentKind::Education && !ctx.hits.is_empty() {
            let titles: Vec<&str> = ctx.hits.iter().map(|h| h.title.as_str()).collect();
            text.push_str(&format!(" Related reading: {}.", titles.join(", ")));
        }

        let mut citations: Vec<Uuid> = Vec::new();
        for hit in &ctx.hits {
            if !citations.contains(&hit.doc_id) {
                citations.push(hit.doc_id);
            }
        }

        Ok(AgentReply {
            agent: self.kind,
            text,
            citations,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AgentTurn {
    pub route: RouteDecision,
    pub inbound: SafetyVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<SafetyVerdict>,
    pub risk: RiskLevel,
    pub reply_text: String,
    pub citations: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    pub blocked: bool,
}

/// One conversational turn: safety in, route, respond, safety out.
pub struct Orchestrator<'a> {
    pub safety: &'a SafetyPipeline,
    pub routing: &'a RoutingTable,
    pub knowledge: &'a KnowledgeBase,
    pub catalog: &'a InterventionCatalog,
}

impl Orchestrator<'_> {
    pub fn handle(
        &self,
        req: &AgentRequest,
        responders: &[Box<dyn AgentResponder>],
        classifier: Option<&dyn SafetyClassifier>,
        now: DateTime<Utc>,
    ) -> CoreResult<AgentTurn> {
        if req.text.trim().is_empty() {
            return Err(CoreError::validation("text", "message text must not be empty"));
        }

        let inbound = self.safety.evaluate(&req.text, Direction::Inbound, classifier);
        let mut signals: Vec<RiskSignal> = req
            .signals
            .iter()
            .filter(|s| s.source != RiskSource::SafetyFilter)
            .cloned()
            .collect();
        signals.push(inbound.to_risk_signal());
        let assessment = combine_signals(signals);
        let risk = assessment.level;

        let intent = classify_intent(&req.text);
        let (route, escalation) = match inbound.action {
            SafetyAction::Escalate | SafetyAction::Block => {
                let reason = inbound
                    .categories()
                    .into_iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let escalation = Escalation::open(
                    req.tenant_id.clone(),
                    req.user_id,
                    risk,
                    format!("inbound safety: {reason}"),
                    now,
                );
                let route = RouteDecision {
                    agent: AgentKind::Crisis,
                    intent,
                    reason: "safety_escalation".to_string(),
                };
                (route, Some(escalation))
            }
            SafetyAction::Allow | SafetyAction::Flag => {
                (self.routing.route(intent, req.stage, risk), None)
            }
        };

        let ctx = ResponderContext {
            hits: self
                .knowledge
                .search(&req.tenant_id, &req.text, Some(req.stage), CONTEXT_HITS),
            pack: self
                .catalog
                .best_match(&MatchCriteria {
                    stage: req.stage,
                    risk,
                    tags: Vec::new(),
                })
                .cloned(),
            risk,
        };

        let responder = responders
            .iter()
            .find(|r| r.kind() == route.agent)
            .ok_or_else(|| {
                CoreError::not_found(format!("responder for agent {}", route.agent.as_str()))
            })?;
        let reply = responder.respond(req, &ctx)?;

        let outbound = self.safety.evaluate(&reply.text, Direction::Outbound, classifier);
        let blocked = outbound.action == SafetyAction::Block;
        let (reply_text, citations) = if blocked {
            tracing::warn!(
                tenant_id = %req.tenant_id,
                user_id = %req.user_id,
                agent = route.agent.as_str(),
                "outbound reply blocked"
            );
            (SAFE_FALLBACK_TEXT.to_string(), Vec::new())
        } else {
            (reply.text, reply.citations)
        };

        tracing::info!(
            tenant_id = %req.tenant_id,
            user_id = %req.user_id,
            agent = route.agent.as_str(),
            reason = %route.reason,
            risk = risk.as_str(),
            escalated = escalation.is_some(),
            blocked,
            "agent turn handled"
        );

        Ok(AgentTurn {
            route,
            inbound,
            outbound: Some(outbound),
            risk,
            reply_text,
            citations,
            escalation,
            blocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::knowledge::KnowledgeDocument;
    use crate::safety::{SafetyConfig, SafetyMatch};

    struct Fixture {
        safety: SafetyPipeline,
        routing: RoutingTable,
        knowledge: KnowledgeBase,
        catalog: InterventionCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                safety: SafetyPipeline::new(SafetyConfig::default()).unwrap(),
                routing: RoutingTable::default(),
                knowledge: KnowledgeBase::new(),
                catalog: InterventionCatalog::with_defaults(),
            }
        }

        fn orchestrator(&self) -> Orchestrator<'_> {
            Orchestrator {
                safety: &self.safety,
                routing: &self.routing,
                knowledge: &self.knowledge,
                catalog: &self.catalog,
            }
        }
    }

    fn tenant() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn request(text: &str, stage: Stage) -> AgentRequest {
        AgentRequest {
            tenant_id: tenant(),
            user_id: Uuid::now_v7(),
            text: text.to_string(),
            stage,
            signals: Vec::new(),
        }
    }

    #[test]
    fn intents_follow_priority_order() {
        assert_eq!(classify_intent("This is an emergency"), Intent::Emergency);
        assert_eq!(classify_intent("Can I take the PHQ questionnaire?"), Intent::AssessmentRequest);
        assert_eq!(classify_intent("I slipped and want to start over"), Intent::Struggle);
        assert_eq!(classify_intent("My goal is to walk daily"), Intent::Goal);
        assert_eq!(classify_intent("How does sleep affect mood"), Intent::Question);
        assert_eq!(classify_intent("is caffeine bad?"), Intent::Question);
        assert_eq!(classify_intent("hello there"), Intent::SmallTalk);
        assert_eq!(classify_intent("canine friends are nice"), Intent::SmallTalk);
    }

    #[test]
    fn intents_match_whole_words_only() {
        assert_eq!(classify_intent("I had to restart my phone"), Intent::SmallTalk);
        assert_eq!(classify_intent("my new gadget is shiny"), Intent::SmallTalk);
        assert_eq!(classify_intent("take the phq-9 please"), Intent::AssessmentRequest);
        assert_eq!(classify_intent("I can't go on like this"), Intent::Emergency);
        assert_eq!(classify_intent("weekly check-in time"), Intent::AssessmentRequest);
    }

    #[test]
    fn goal_routing_depends_on_stage() {
        let table = RoutingTable::default();
        let early = table.route(Intent::Goal, Stage::Contemplation, RiskLevel::None);
        assert_eq!(early.agent, AgentKind::Motivation);
        let late = table.route(Intent::Goal, Stage::Action, RiskLevel::Low);
        assert_eq!(late.agent, AgentKind::Coach);
    }

    #[test]
    fn high_risk_overrides_rules() {
        let table = RoutingTable::default();
        let decision = table.route(Intent::Question, Stage::Action, RiskLevel::High);
        assert_eq!(decision.agent, AgentKind::Crisis);
        assert_eq!(decision.reason, "risk_override");
    }

    #[test]
    fn empty_table_falls_back_to_coach() {
        let table = RoutingTable { rules: Vec::new() };
        let decision = table.route(Intent::Question, Stage::Action, RiskLevel::None);
        assert_eq!(decision.agent, AgentKind::Coach);
        assert_eq!(decision.reason, "fallback");
    }

    #[test]
    fn question_turn_cites_published_knowledge() {
        let mut fx = Fixture::new();
        let mut doc = KnowledgeDocument::new(
            tenant(),
            "Sleep and mood",
            "Regular sleep schedules improve mood and reduce irritability over a few weeks.",
            "editor",
            now(),
        )
        .unwrap();
        doc.submit(now()).unwrap();
        doc.approve(now()).unwrap();
        let doc_id = doc.id;
        fx.knowledge.upsert(doc);

        let turn = fx
            .orchestrator()
            .handle(
                &request("How does sleep affect my mood?", Stage::Action),
                &TemplateResponder::all(),
                None,
                now(),
            )
            .unwrap();

        assert_eq!(turn.route.agent, AgentKind::Education);
        assert!(turn.reply_text.contains("Sleep and mood"));
        assert_eq!(turn.citations, vec![doc_id]);
        assert!(turn.escalation.is_none());
        assert!(!turn.blocked);
    }

    #[test]
    fn crisis_language_routes_to_crisis_and_opens_escalation() {
        let fx = Fixture::new();
        let turn = fx
            .orchestrator()
            .handle(
                &request("I want to kill myself tonight", Stage::Action),
                &TemplateResponder::all(),
                None,
                now(),
            )
            .unwrap();

        assert_eq!(turn.route.agent, AgentKind::Crisis);
        assert_eq!(turn.route.reason, "safety_escalation");
        let escalation = turn.escalation.expect("escalation opened");
        assert_eq!(escalation.level, RiskLevel::Critical);
        assert!(escalation.due_at.is_some());
        assert!(turn.reply_text.contains("Grounding") || turn.reply_text.contains("crisis line"));
    }

    fn signal(source: RiskSource, level: RiskLevel) -> RiskSignal {
        RiskSignal {
            source,
            level,
            detail: String::new(),
        }
    }

    #[test]
    fn stored_signals_combine_with_safety_signal() {
        let fx = Fixture::new();
        let mut req = request("hello there", Stage::Action);
        req.signals = vec![signal(RiskSource::Assessment, RiskLevel::High)];
        let turn = fx
            .orchestrator()
            .handle(&req, &TemplateResponder::all(), None, now())
            .unwrap();
        assert_eq!(turn.risk, RiskLevel::High);
        assert_eq!(turn.route.reason, "risk_override");
    }

    #[test]
    fn repeated_high_message_is_not_counted_twice() {
        let fx = Fixture::new();
        let mut req = request("I want to hurt myself", Stage::Action);
        let first = fx
            .orchestrator()
            .handle(&req, &TemplateResponder::all(), None, now())
            .unwrap();
        assert_eq!(first.risk, RiskLevel::High);

        req.signals = vec![first.inbound.to_risk_signal()];
        let second = fx
            .orchestrator()
            .handle(&req, &TemplateResponder::all(), None, now())
            .unwrap();
        assert_eq!(second.risk, RiskLevel::High);
        assert_eq!(second.escalation.map(|e| e.level), Some(RiskLevel::High));
    }

    #[test]
    fn calm_message_supersedes_stored_safety_signal() {
        let fx = Fixture::new();
        let mut req = request("hello there", Stage::Action);
        req.signals = vec![signal(RiskSource::SafetyFilter, RiskLevel::Critical)];
        let turn = fx
            .orchestrator()
            .handle(&req, &TemplateResponder::all(), None, now())
            .unwrap();
        assert_eq!(turn.risk, RiskLevel::None);
        assert_ne!(turn.route.agent, AgentKind::Crisis);
    }

    #[test]
    fn missing_responder_is_not_found() {
        let fx = Fixture::new();
        let responders: Vec<Box<dyn AgentResponder>> =
            vec![Box::new(TemplateResponder::new(AgentKind::Coach))];
        let err = fx
            .orchestrator()
            .handle(&request("What is a habit?", Stage::Action), &responders, None, now())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    struct Leaky;

    impl AgentResponder for Leaky {
        fn kind(&self) -> AgentKind {
            AgentKind::Coach
        }

        fn respond(&self, _req: &AgentRequest, _ctx: &ResponderContext) -> CoreResult<AgentReply> {
            Ok(AgentReply {
                agent: AgentKind::Coach,
                text: "You should stop taking your medication.".to_string(),
                citations: Vec::new(),
            })
        }
    }

    #[test]
    fn blocked_outbound_reply_is_replaced() {
        let fx = Fixture::new();
        let responders: Vec<Box<dyn AgentResponder>> = vec![Box::new(Leaky)];
        let turn = fx
            .orchestrator()
            .handle(&request("hello there", Stage::Action), &responders, None, now())
            .unwrap();
        assert!(turn.blocked);
        assert_eq!(turn.reply_text, SAFE_FALLBACK_TEXT);
    }

    #[test]
    fn empty_text_is_rejected() {
        let fx = Fixture::new();
        let err = fx
            .orchestrator()
            .handle(&request("   ", Stage::Action), &TemplateResponder::all(), None, now())
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn classifier_signal_reaches_the_turn() {
        let fx = Fixture::new();
        let classifier = crate::safety::StaticClassifier::Flag {
            category: crate::safety::SafetyCategory::SelfHarm,
            severity: RiskLevel::Critical,
        };
        let turn = fx
            .orchestrator()
            .handle(
                &request("hello there", Stage::Action),
                &TemplateResponder::all(),
                Some(&classifier),
                now(),
            )
            .unwrap();
        assert!(turn.escalation.is_some());
        let matched: Vec<&SafetyMatch> = turn.inbound.matches.iter().collect();
        assert!(!matched.is_empty());
    }
}
