//! In-memory, tenant-scoped storage. Every map is keyed by `TenantId` first,
//! so a lookup with the wrong tenant finds nothing.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use haven_core::assessments::AssessmentResult;
use haven_core::auth::{generate_api_key, hash_token, key_prefix};
use haven_core::coaching::{CoachProfile, Escalation, ReviewStatus, ReviewTransition, assign_coach};
use haven_core::error::{CoreError, CoreResult};
use haven_core::incentives::PointsLedger;
use haven_core::knowledge::{KnowledgeBase, KnowledgeDocument, LifecycleAction};
use haven_core::risk::{RiskAssessment, RiskLevel, RiskSignal, RiskSource, combine_signals};
use haven_core::stages::{Stage, StageRecord, TransitionKind};
use haven_core::tenants::{Feature, Tenant, TenantId};
use uuid::Uuid;

/// Resolved identity of an API key.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub key_id: Uuid,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
struct ApiKeyRecord {
    id: Uuid,
    tenant_id: TenantId,
    prefix: String,
    scopes: Vec<String>,
    created_at: DateTime<Utc>,
}

/// A freshly minted key. The plaintext is only available here.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key_id: Uuid,
    pub api_key: String,
    pub prefix: String,
}

type UserKey = (TenantId, Uuid);

#[derive(Debug, Default)]
pub struct Store {
    tenants: HashMap<TenantId, Tenant>,
    api_keys: HashMap<String, ApiKeyRecord>,
    stages: HashMap<UserKey, StageRecord>,
    assessments: HashMap<UserKey, Vec<AssessmentResult>>,
    /// Keyed by source, and by instrument for assessments.
    risk_signals: HashMap<UserKey, BTreeMap<String, RiskSignal>>,
    coaches: HashMap<TenantId, Vec<CoachProfile>>,
    escalations: HashMap<UserKey, Escalation>,
    knowledge: KnowledgeBase,
    ledgers: HashMap<TenantId, PointsLedger>,
    agent_turns: HashMap<(TenantId, NaiveDate), u32>,
}

fn plan_limit(resource: &str, limit: u32) -> CoreError {
    CoreError::policy(
        "plan_limit_reached",
        format!("the tenant plan allows at most {limit} {resource}"),
    )
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // --- tenants and keys ---

    pub fn add_tenant(&mut self, tenant: Tenant) -> CoreResult<()> {
        if self.tenants.contains_key(&tenant.id) {
            return Err(CoreError::conflict(format!("tenant '{}' already exists", tenant.id)));
        }
        self.tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    /// Add a tenant and mint its first key.
    pub fn create_tenant(&mut self, tenant: Tenant, scopes: Vec<String>) -> CoreResult<IssuedKey> {
        let tenant_id = tenant.id.clone();
        let created_at = tenant.created_at;
        self.add_tenant(tenant)?;
        let (api_key, _) = generate_api_key();
        let issued = self.insert_key(&tenant_id, &api_key, scopes, created_at)?;
        tracing::info!(tenant_id = %tenant_id, key_prefix = %issued.prefix, "tenant created");
        Ok(issued)
    }

    /// Register an existing plaintext key for a tenant.
    pub fn insert_key(
        &mut self,
        tenant_id: &TenantId,
        api_key: &str,
        scopes: Vec<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<IssuedKey> {
        self.tenant(tenant_id)?;
        let hash = hash_token(api_key);
        if self.api_keys.contains_key(&hash) {
            return Err(CoreError::conflict("api key already registered"));
        }
        let record = ApiKeyRecord {
            id: Uuid::now_v7(),
            tenant_id: tenant_id.clone(),
            prefix: key_prefix(api_key),
            scopes,
            created_at: at,
        };
        let issued = IssuedKey {
            key_id: record.id,
            api_key: api_key.to_string(),
            prefix: record.prefix.clone(),
        };
        self.api_keys.insert(hash, record);
        Ok(issued)
    }

    pub fn resolve_key(&self, api_key: &str) -> Option<TenantContext> {
        let record = self.api_keys.get(&hash_token(api_key))?;
        tracing::debug!(
            tenant_id = %record.tenant_id,
            key_prefix = %record.prefix,
            key_created_at = %record.created_at,
            "api key resolved"
        );
        Some(TenantContext {
            tenant_id: record.tenant_id.clone(),
            key_id: record.id,
            scopes: record.scopes.clone(),
        })
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn tenant(&self, tenant_id: &TenantId) -> CoreResult<&Tenant> {
        self.tenants
            .get(tenant_id)
            .ok_or_else(|| CoreError::not_found(format!("tenant '{tenant_id}'")))
    }

    pub fn require_feature(&self, tenant_id: &TenantId, feature: Feature) -> CoreResult<()> {
        self.tenant(tenant_id)?.require_feature(feature)
    }

    /// Count one agent turn against the daily plan limit.
    pub fn count_agent_turn(&mut self, tenant_id: &TenantId, day: NaiveDate) -> CoreResult<()> {
        let limit = self.tenant(tenant_id)?.limits().max_daily_agent_turns;
        self.agent_turns.retain(|(_, counted_day), _| *counted_day >= day);
        let used = self.agent_turns.entry((tenant_id.clone(), day)).or_insert(0);
        if *used >= limit {
            return Err(plan_limit("agent turns per day", limit));
        }
        *used += 1;
        Ok(())
    }

    // --- stages and risk ---

    pub fn stage(&self, tenant_id: &TenantId, user_id: Uuid) -> CoreResult<&StageRecord> {
        self.stages
            .get(&(tenant_id.clone(), user_id))
            .ok_or_else(|| CoreError::not_found(format!("stage record for user {user_id}")))
    }

    pub fn current_stage(&self, tenant_id: &TenantId, user_id: Uuid) -> Option<Stage> {
        self.stages
            .get(&(tenant_id.clone(), user_id))
            .map(|r| r.current)
    }

    /// Create the record on first use, otherwise transition it. A relapse
    /// adds a low-level risk signal for the user.
    pub fn set_stage(
        &mut self,
        tenant_id: &TenantId,
        user_id: Uuid,
        stage: Stage,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<StageRecord> {
        let key = (tenant_id.clone(), user_id);
        let kind = match self.stages.get_mut(&key) {
            Some(record) => record.transition(stage, reason, at)?.kind,
            None => {
                self.stages.insert(key.clone(), StageRecord::new(user_id, stage, at));
                TransitionKind::Initial
            }
        };

        if kind == TransitionKind::Relapse {
            self.record_signal(
                tenant_id,
                user_id,
                RiskSignal {
                    source: RiskSource::StageRelapse,
                    level: RiskLevel::Low,
                    detail: format!("relapse to {}", stage.as_str()),
                },
            );
        }

        self.stage(tenant_id, user_id).cloned()
    }

    /// Latest signal per source wins.
    pub fn record_signal(&mut self, tenant_id: &TenantId, user_id: Uuid, signal: RiskSignal) {
        let key = signal.source.as_str().to_string();
        self.store_signal(tenant_id, user_id, key, signal);
    }

    fn store_signal(
        &mut self,
        tenant_id: &TenantId,
        user_id: Uuid,
        key: String,
        signal: RiskSignal,
    ) {
        self.risk_signals
            .entry((tenant_id.clone(), user_id))
            .or_default()
            .insert(key, signal);
    }

    pub fn risk_signals(&self, tenant_id: &TenantId, user_id: Uuid) -> Vec<RiskSignal> {
        self.risk_signals
            .get(&(tenant_id.clone(), user_id))
            .map(|signals| signals.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_risk(&self, tenant_id: &TenantId, user_id: Uuid) -> RiskAssessment {
        combine_signals(self.risk_signals(tenant_id, user_id))
    }

    /// Each instrument keeps its own signal.
    pub fn record_assessment(
        &mut self,
        tenant_id: &TenantId,
        user_id: Uuid,
        result: AssessmentResult,
    ) {
        let signal = RiskSignal {
            source: RiskSource::Assessment,
            level: result.risk,
            detail: format!("{} {} ({})", result.instrument, result.total, result.band),
        };
        let key = format!("{}:{}", RiskSource::Assessment.as_str(), result.instrument);
        self.store_signal(tenant_id, user_id, key, signal);
        self.assessments
            .entry((tenant_id.clone(), user_id))
            .or_default()
            .push(result);
    }

    pub fn assessments(&self, tenant_id: &TenantId, user_id: Uuid) -> &[AssessmentResult] {
        self.assessments
            .get(&(tenant_id.clone(), user_id))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // --- coaches and escalations ---

    pub fn add_coach(&mut self, profile: CoachProfile) -> CoreResult<()> {
        let limit = self.tenant(&profile.tenant_id)?.limits().max_members;
        let roster = self.coaches.entry(profile.tenant_id.clone()).or_default();
        if roster.len() as u32 >= limit {
            return Err(plan_limit("members", limit));
        }
        tracing::info!(
            tenant_id = %profile.tenant_id,
            coach_id = %profile.id,
            level = ?profile.level,
            "coach registered"
        );
        roster.push(profile);
        Ok(())
    }

    pub fn coach_mut(
        &mut self,
        tenant_id: &TenantId,
        coach_id: Uuid,
    ) -> CoreResult<&mut CoachProfile> {
        self.coaches
            .get_mut(tenant_id)
            .and_then(|roster| roster.iter_mut().find(|c| c.id == coach_id))
            .ok_or_else(|| CoreError::not_found(format!("coach {coach_id}")))
    }

    pub fn coaches(&self, tenant_id: &TenantId) -> &[CoachProfile] {
        self.coaches
            .get(tenant_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Store a new escalation, auto-assigning a qualified coach when the
    /// tenant runs the coach workflow and one has capacity.
    pub fn open_escalation(
        &mut self,
        mut escalation: Escalation,
        at: DateTime<Utc>,
    ) -> CoreResult<Escalation> {
        let tenant_id = escalation.tenant_id.clone();
        if self.tenant(&tenant_id)?.feature_enabled(Feature::CoachWorkflow) {
            let candidate = assign_coach(self.coaches(&tenant_id), escalation.level).map(|c| c.id);
            if let Some(coach_id) = candidate {
                escalation.assign(coach_id, at)?;
                self.coach_mut(&tenant_id, coach_id)?.caseload += 1;
            }
        }
        self.escalations
            .insert((tenant_id, escalation.id), escalation.clone());
        Ok(escalation)
    }

    /// Unresolved escalations, most urgent first.
    pub fn open_escalations(&self, tenant_id: &TenantId) -> Vec<Escalation> {
        let mut open: Vec<Escalation> = self
            .escalations
            .iter()
            .filter(|((t, _), e)| t == tenant_id && e.status != ReviewStatus::Resolved)
            .map(|(_, e)| e.clone())
            .collect();
        open.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then_with(|| a.due_at.cmp(&b.due_at))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        open
    }

    /// Apply a review move and keep coach caseloads in step with assignees.
    pub fn transition_escalation(
        &mut self,
        tenant_id: &TenantId,
        id: Uuid,
        transition: ReviewTransition,
        at: DateTime<Utc>,
    ) -> CoreResult<Escalation> {
        if let ReviewTransition::Assign { coach_id } = &transition {
            let coach = self.coach_mut(tenant_id, *coach_id)?;
            if !coach.has_capacity() {
                return Err(CoreError::conflict(format!("coach {coach_id} has no spare capacity")));
            }
        }

        let key = (tenant_id.clone(), id);
        let escalation = self
            .escalations
            .get_mut(&key)
            .ok_or_else(|| CoreError::not_found(format!("escalation {id}")))?;
        let before = escalation.assignee;
        escalation.apply(transition, at)?;
        let after = escalation.assignee;
        let resolved = escalation.status == ReviewStatus::Resolved;
        let snapshot = escalation.clone();

        if let Some(previous) = before {
            if after != before || resolved {
                let coach = self.coach_mut(tenant_id, previous)?;
                coach.caseload = coach.caseload.saturating_sub(1);
                if resolved {
                    coach.cases_closed += 1;
                }
            }
        }
        if let Some(next) = after {
            if after != before {
                self.coach_mut(tenant_id, next)?.caseload += 1;
            }
        }
        Ok(snapshot)
    }

    // --- knowledge ---

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn add_document(&mut self, doc: KnowledgeDocument) -> CoreResult<()> {
        let limit = self.tenant(&doc.tenant_id)?.limits().max_documents;
        if self.knowledge.count(&doc.tenant_id) as u32 >= limit {
            return Err(plan_limit("documents", limit));
        }
        self.knowledge.upsert(doc);
        Ok(())
    }

    pub fn apply_document_action(
        &mut self,
        tenant_id: &TenantId,
        id: Uuid,
        action: LifecycleAction,
        at: DateTime<Utc>,
    ) -> CoreResult<KnowledgeDocument> {
        let mut doc = self.knowledge.get(tenant_id, id)?.clone();
        doc.apply(action, at)?;
        self.knowledge.upsert(doc.clone());
        tracing::info!(
            tenant_id = %tenant_id,
            doc_id = %id,
            action = ?action,
            status = ?doc.status,
            "knowledge document moved"
        );
        Ok(doc)
    }

    // --- incentives ---

    pub fn ledger(&self, tenant_id: &TenantId) -> Option<&PointsLedger> {
        self.ledgers.get(tenant_id)
    }

    pub fn ledger_mut(&mut self, tenant_id: &TenantId) -> &mut PointsLedger {
        self.ledgers.entry(tenant_id.clone()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use haven_core::coaching::CoachLevel;
    use haven_core::tenants::TenantPlan;

    use super::*;

    fn tenant_id(slug: &str) -> TenantId {
        TenantId::parse(slug).unwrap()
    }

    fn store_with(slugs: &[(&str, TenantPlan)]) -> Store {
        let mut store = Store::new();
        for (slug, plan) in slugs {
            let tenant = Tenant::new(tenant_id(slug), *slug, *plan, Utc::now());
            store.create_tenant(tenant, vec!["*".to_string()]).unwrap();
        }
        store
    }

    #[test]
    fn keys_resolve_to_their_tenant_only() {
        let mut store = Store::new();
        let issued = store
            .create_tenant(
                Tenant::new(tenant_id("acme"), "Acme", TenantPlan::Standard, Utc::now()),
                vec!["safety:*".to_string()],
            )
            .unwrap();
        let ctx = store.resolve_key(&issued.api_key).unwrap();
        assert_eq!(ctx.tenant_id, tenant_id("acme"));
        assert_eq!(ctx.scopes, vec!["safety:*"]);
        assert!(store.resolve_key("haven_sk_nope").is_none());
    }

    #[test]
    fn duplicate_tenant_conflicts() {
        let mut store = store_with(&[("acme", TenantPlan::Free)]);
        let again = Tenant::new(tenant_id("acme"), "Again", TenantPlan::Free, Utc::now());
        let err = store.create_tenant(again, Vec::new()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn stage_records_are_tenant_scoped() {
        let mut store =
            store_with(&[("acme", TenantPlan::Standard), ("globex", TenantPlan::Standard)]);
        let user = Uuid::now_v7();
        store
            .set_stage(&tenant_id("acme"), user, Stage::Contemplation, None, Utc::now())
            .unwrap();
        assert!(store.stage(&tenant_id("acme"), user).is_ok());
        assert!(matches!(
            store.stage(&tenant_id("globex"), user),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn relapse_raises_user_risk() {
        let mut store = store_with(&[("acme", TenantPlan::Standard)]);
        let acme = tenant_id("acme");
        let user = Uuid::now_v7();
        let t0 = Utc::now();
        store.set_stage(&acme, user, Stage::Preparation, None, t0).unwrap();
        store.set_stage(&acme, user, Stage::Action, None, t0).unwrap();
        store
            .set_stage(&acme, user, Stage::Contemplation, Some("lost job".to_string()), t0)
            .unwrap();
        assert_eq!(store.user_risk(&acme, user).level, RiskLevel::Low);
    }

    #[test]
    fn escalation_auto_assigns_and_tracks_caseload() {
        let mut store = store_with(&[("acme", TenantPlan::Standard)]);
        let acme = tenant_id("acme");
        let now = Utc::now();
        let coach = CoachProfile::new(acme.clone(), "Sam", CoachLevel::Expert, 5, now);
        let coach_id = coach.id;
        store.add_coach(coach).unwrap();

        let opened = store
            .open_escalation(
                Escalation::open(acme.clone(), Uuid::now_v7(), RiskLevel::Critical, "test", now),
                now,
            )
            .unwrap();
        assert_eq!(opened.assignee, Some(coach_id));
        assert_eq!(store.coaches(&acme)[0].caseload, 1);

        store
            .transition_escalation(&acme, opened.id, ReviewTransition::StartReview, now)
            .unwrap();
        let resolved = store
            .transition_escalation(&acme, opened.id, ReviewTransition::Resolve { note: None }, now)
            .unwrap();
        assert_eq!(resolved.status, ReviewStatus::Resolved);
        assert_eq!(store.coaches(&acme)[0].caseload, 0);
        assert_eq!(store.coaches(&acme)[0].cases_closed, 1);
        assert!(store.open_escalations(&acme).is_empty());
    }

    #[test]
    fn escalate_releases_the_coach() {
        let mut store = store_with(&[("acme", TenantPlan::Standard)]);
        let acme = tenant_id("acme");
        let now = Utc::now();
        let coach = CoachProfile::new(acme.clone(), "Sam", CoachLevel::Senior, 5, now);
        store.add_coach(coach).unwrap();

        let opened = store
            .open_escalation(
                Escalation::open(acme.clone(), Uuid::now_v7(), RiskLevel::High, "test", now),
                now,
            )
            .unwrap();
        assert!(opened.assignee.is_some());
        store
            .transition_escalation(&acme, opened.id, ReviewTransition::Escalate { note: None }, now)
            .unwrap();
        assert_eq!(store.coaches(&acme)[0].caseload, 0);
    }

    #[test]
    fn assigning_unknown_coach_is_not_found() {
        let mut store = store_with(&[("acme", TenantPlan::Standard)]);
        let acme = tenant_id("acme");
        let now = Utc::now();
        let opened = store
            .open_escalation(
                Escalation::open(acme.clone(), Uuid::now_v7(), RiskLevel::High, "test", now),
                now,
            )
            .unwrap();
        assert!(opened.assignee.is_none());
        let err = store
            .transition_escalation(
                &acme,
                opened.id,
                ReviewTransition::Assign { coach_id: Uuid::now_v7() },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn free_plan_document_limit() {
        let mut store = store_with(&[("acme", TenantPlan::Free)]);
        let acme = tenant_id("acme");
        let doc = |title: &str| {
            KnowledgeDocument::new(acme.clone(), title, "body text", "ed", Utc::now()).unwrap()
        };
        for n in 0..20 {
            store.add_document(doc(&format!("Doc {n}"))).unwrap();
        }
        let doc = doc("One more");
        match store.add_document(doc) {
            Err(CoreError::PolicyViolation { code, .. }) => assert_eq!(code, "plan_limit_reached"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn agent_turn_limit_resets_daily() {
        let mut store = store_with(&[("acme", TenantPlan::Free)]);
        let acme = tenant_id("acme");
        let day = Utc::now().date_naive();
        for _ in 0..200 {
            store.count_agent_turn(&acme, day).unwrap();
        }
        assert!(store.count_agent_turn(&acme, day).is_err());
        assert!(store.count_agent_turn(&acme, day.succ_opt().unwrap()).is_ok());
        assert_eq!(store.agent_turns.len(), 1);
    }

    fn result(instrument: &str, total: u32, band: &str, risk: RiskLevel) -> AssessmentResult {
        AssessmentResult {
            instrument: instrument.to_string(),
            total,
            max_total: 27,
            band: band.to_string(),
            risk,
            critical_flags: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn instruments_keep_separate_risk_signals() {
        let mut store = store_with(&[("acme", TenantPlan::Free)]);
        let acme = tenant_id("acme");
        let user = Uuid::now_v7();
        store.record_assessment(&acme, user, result("phq9", 3, "minimal", RiskLevel::Critical));
        store.record_assessment(&acme, user, result("gad7", 0, "minimal", RiskLevel::None));
        assert_eq!(store.user_risk(&acme, user).level, RiskLevel::Critical);
        assert_eq!(store.risk_signals(&acme, user).len(), 2);

        // A retake of the same instrument replaces its signal.
        store.record_assessment(&acme, user, result("phq9", 2, "minimal", RiskLevel::None));
        assert_eq!(store.user_risk(&acme, user).level, RiskLevel::None);
    }

    #[test]
    fn safety_filter_signal_is_replaced_not_accumulated() {
        let mut store = store_with(&[("acme", TenantPlan::Free)]);
        let acme = tenant_id("acme");
        let user = Uuid::now_v7();
        let reading = |level| RiskSignal {
            source: RiskSource::SafetyFilter,
            level,
            detail: String::new(),
        };
        store.record_signal(&acme, user, reading(RiskLevel::High));
        store.record_signal(&acme, user, reading(RiskLevel::High));
        assert_eq!(store.user_risk(&acme, user).level, RiskLevel::High);
        store.record_signal(&acme, user, reading(RiskLevel::None));
        assert_eq!(store.user_risk(&acme, user).level, RiskLevel::None);
    }
}
