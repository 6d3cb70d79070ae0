use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use haven_core::safety::SafetyConfig;
use haven_core::tenants::{Tenant, TenantId, TenantPlan};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::state::{AppState, SignupGate};
use crate::store::Store;

struct TestApp {
    router: Router,
    key: String,
}

fn test_app(plan: TenantPlan, scopes: &[&str]) -> TestApp {
    let mut store = Store::new();
    let issued = store
        .create_tenant(
            Tenant::new(TenantId::parse("acme").unwrap(), "Acme", plan, Utc::now()),
            scopes.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
    let state = AppState::new(store, SafetyConfig::default(), SignupGate::Open).unwrap();
    TestApp {
        router: crate::app(state, &[]),
        key: issued.api_key,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "127.0.0.1")
            .header("authorization", format!("Bearer {}", self.key));
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");
        send(&self.router, request).await
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

#[tokio::test]
async fn health_needs_no_key() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "127.0.0.1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tenants"], 1);
}

#[tokio::test]
async fn v1_routes_reject_missing_and_unknown_keys() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let missing = Request::builder()
        .method("POST")
        .uri("/v1/safety/check")
        .header("x-forwarded-for", "127.0.0.1")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "hello" }).to_string()))
        .unwrap();
    let (status, body) = send(&app.router, missing).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let forged = TestApp {
        router: app.router.clone(),
        key: format!("haven_sk_{}", "0".repeat(64)),
    };
    let (status, _) = forged
        .send("POST", "/v1/safety/check", Some(json!({ "text": "hello" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn safety_check_escalates_crisis_text() {
    let app = test_app(TenantPlan::Free, &["safety:*"]);
    let (status, body) = app
        .send(
            "POST",
            "/v1/safety/check",
            Some(json!({ "text": "I want to kill myself tonight" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "escalate");
    assert_eq!(body["risk"], "critical");
    assert_eq!(body["direction"], "inbound");
}

#[tokio::test]
async fn safety_check_requires_scope() {
    let app = test_app(TenantPlan::Free, &["stages:read"]);
    let (status, body) = app
        .send("POST", "/v1/safety/check", Some(json!({ "text": "hello" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn critical_assessment_item_opens_escalation() {
    let app = test_app(TenantPlan::Standard, &["*"]);
    let user_id = Uuid::now_v7();
    let mut answers = serde_json::Map::new();
    for i in 1..=9 {
        answers.insert(format!("phq9_{i}"), json!(if i == 9 { 1 } else { 0 }));
    }
    let (status, body) = app
        .send(
            "POST",
            "/v1/assessments",
            Some(json!({ "user_id": user_id, "instrument": "phq9", "answers": answers })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["critical_flags"], json!(["phq9_9"]));
    assert!(body.get("previous_total").is_none());
    assert_eq!(body["escalation"]["user_id"], json!(user_id));

    let (status, body) = app.send("GET", "/v1/escalations", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    // Standard plan earns points for the completed assessment.
    let (_, summary) = app
        .send("GET", &format!("/v1/incentives/{user_id}"), None)
        .await;
    assert!(summary["balance"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn assessment_with_unknown_instrument_is_not_found() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let (status, _) = app
        .send(
            "POST",
            "/v1/assessments",
            Some(json!({ "user_id": Uuid::now_v7(), "instrument": "nope", "answers": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stage_moves_one_step_at_a_time() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let uri = format!("/v1/users/{}/stage", Uuid::now_v7());

    let (status, _) = app.send("GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send("POST", &uri, Some(json!({ "stage": "contemplation" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["current"], "contemplation");

    let (status, body) = app
        .send("POST", &uri, Some(json!({ "stage": "maintenance" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");

    let (status, body) = app
        .send("POST", &uri, Some(json!({ "stage": "preparation", "reason": "booked a session" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["current"], "preparation");
    assert_eq!(body["relapse_count"], 0);
}

#[tokio::test]
async fn free_plan_has_no_incentives() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let (status, body) = app
        .send(
            "POST",
            &format!("/v1/incentives/{}/activities", Uuid::now_v7()),
            Some(json!({ "activity": "daily_check_in" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "policy_violation");
    assert_eq!(body["error_code"], "feature_disabled");
}

#[tokio::test]
async fn redeem_beyond_balance_conflicts() {
    let app = test_app(TenantPlan::Standard, &["*"]);
    let user_id = Uuid::now_v7();
    let (status, body) = app
        .send(
            "POST",
            &format!("/v1/incentives/{user_id}/activities"),
            Some(json!({ "activity": "daily_check_in" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], true);
    let balance = body["outcome"]["balance"].as_i64().unwrap();

    let (status, body) = app
        .send(
            "POST",
            &format!("/v1/incentives/{user_id}/redeem"),
            Some(json!({ "cost": balance + 1, "reward": "sticker" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = app
        .send(
            "POST",
            &format!("/v1/incentives/{user_id}/redeem"),
            Some(json!({ "cost": balance, "reward": "sticker" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 0);
}

#[tokio::test]
async fn knowledge_is_searchable_only_after_review() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let (status, doc) = app
        .send(
            "POST",
            "/v1/knowledge",
            Some(json!({
                "title": "Sleep hygiene",
                "body": "Go to bed at the same time every night and keep screens out of the bedroom.",
                "author": "dr-lee",
                "tags": ["sleep"]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["status"], "draft");
    let doc_id = doc["id"].as_str().unwrap().to_string();
    let search_uri = "/v1/knowledge/search?q=sleep%20better%20at%20night";

    let (_, body) = app.send("GET", search_uri, None).await;
    assert_eq!(body["hits"], json!([]));

    let status_uri = format!("/v1/knowledge/{doc_id}/status");
    let (status, _) = app
        .send("POST", &status_uri, Some(json!({ "action": "approve" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send("POST", &status_uri, Some(json!({ "action": "submit" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_review");

    let (status, body) = app
        .send("POST", &status_uri, Some(json!({ "action": "approve" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "published");

    let (status, body) = app.send("GET", search_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hits"][0]["doc_id"], json!(doc_id));
}

#[tokio::test]
async fn reviewer_scope_is_required_to_approve() {
    let app = test_app(TenantPlan::Free, &["knowledge:write"]);
    let (_, doc) = app
        .send(
            "POST",
            "/v1/knowledge",
            Some(json!({
                "title": "Breathing",
                "body": "Box breathing: four counts in.",
                "author": "a"
            })),
        )
        .await;
    let status_uri = format!("/v1/knowledge/{}/status", doc["id"].as_str().unwrap());
    app.send("POST", &status_uri, Some(json!({ "action": "submit" })))
        .await;
    let (status, _) = app
        .send("POST", &status_uri, Some(json!({ "action": "approve" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn agent_routes_crisis_messages_to_crisis_agent() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let user_id = Uuid::now_v7();
    let (status, body) = app
        .send(
            "POST",
            "/v1/agent/messages",
            Some(json!({ "user_id": user_id, "text": "I want to kill myself" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["route"]["agent"], "crisis");
    assert_eq!(body["route"]["reason"], "safety_escalation");
    assert_eq!(body["escalation"]["user_id"], json!(user_id));
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn agent_rejects_empty_message() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let (status, _) = app
        .send(
            "POST",
            "/v1/agent/messages",
            Some(json!({ "user_id": Uuid::now_v7(), "text": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_creates_tenant_with_working_key() {
    let app = test_app(TenantPlan::Enterprise, &["admin"]);
    let (status, body) = app
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "beta-clinic", "name": "Beta Clinic", "plan": "free" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let api_key = body["api_key"].as_str().unwrap().to_string();
    assert!(api_key.starts_with("haven_sk_"));
    assert!(!body["scopes"].as_array().unwrap().contains(&json!("admin")));

    let beta = TestApp {
        router: app.router.clone(),
        key: api_key,
    };
    let (status, _) = beta
        .send("POST", "/v1/safety/check", Some(json!({ "text": "hello" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = beta
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "gamma", "name": "Gamma", "plan": "free" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "beta-clinic", "name": "Again", "plan": "free" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_json_reports_field() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let (status, body) = app
        .send("POST", "/v1/safety/check", Some(json!({ "direction": "inbound" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_failed");
    assert_eq!(body["field"], "text");
}

fn answers(prefix: &str, values: &[u8]) -> Value {
    let map: serde_json::Map<String, Value> = values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{prefix}_{}", i + 1), json!(v)))
        .collect();
    Value::Object(map)
}

#[tokio::test]
async fn repeated_self_harm_message_keeps_its_level() {
    let app = test_app(TenantPlan::Standard, &["*"]);
    let user_id = Uuid::now_v7();
    let message = json!({ "user_id": user_id, "text": "I want to hurt myself" });

    let (status, first) = app
        .send("POST", "/v1/agent/messages", Some(message.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["risk"], "high");
    assert_eq!(first["escalation"]["action"], "expert_review");

    let (status, second) = app.send("POST", "/v1/agent/messages", Some(message)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["risk"], first["risk"]);
    assert_eq!(second["escalation"]["action"], "expert_review");

    let (_, calm) = app
        .send(
            "POST",
            "/v1/agent/messages",
            Some(json!({ "user_id": user_id, "text": "hello there" })),
        )
        .await;
    assert_eq!(calm["risk"], "none");
    assert_ne!(calm["route"]["agent"], "crisis");
}

#[tokio::test]
async fn later_calm_instrument_keeps_earlier_critical_risk() {
    let app = test_app(TenantPlan::Free, &["*"]);
    let user_id = Uuid::now_v7();
    let (status, _) = app
        .send(
            "POST",
            "/v1/assessments",
            Some(json!({
                "user_id": user_id,
                "instrument": "phq9",
                "answers": answers("phq9", &[0, 0, 0, 0, 0, 0, 0, 0, 3])
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            "POST",
            "/v1/assessments",
            Some(json!({
                "user_id": user_id,
                "instrument": "gad7",
                "answers": answers("gad7", &[0, 0, 0, 0, 0, 0, 0])
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk"]["level"], "critical");

    let (_, turn) = app
        .send(
            "POST",
            "/v1/agent/messages",
            Some(json!({ "user_id": user_id, "text": "hello there" })),
        )
        .await;
    assert_eq!(turn["risk"], "critical");
    assert_eq!(turn["route"]["agent"], "crisis");
}

#[tokio::test]
async fn tenant_creator_cannot_mint_broader_scopes() {
    let app = test_app(TenantPlan::Standard, &["tenants:create"]);
    let (status, body) = app
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "rogue", "name": "Rogue", "plan": "free", "scopes": ["*"] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = app
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "clinic", "name": "Clinic", "plan": "free" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let minted = TestApp {
        router: app.router.clone(),
        key: body["api_key"].as_str().unwrap().to_string(),
    };
    let (status, _) = minted
        .send(
            "POST",
            "/v1/admin/tenants",
            Some(json!({ "tenant_id": "other", "name": "Other", "plan": "free" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
