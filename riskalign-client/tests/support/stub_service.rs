//! In-process stand-in for the analytics service.
#![allow(dead_code)]

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use riskalign_client::{AnalyticsClient, PROVIDER_HEADER};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct Stub {
    seen: Arc<Mutex<Vec<(String, String)>>>,
    score_failure: Option<StatusCode>,
    plan_failure: Option<StatusCode>,
}

impl Stub {
    /// Answer the score route with `status` instead of scores.
    pub fn failing_scores(mut self, status: StatusCode) -> Self {
        self.score_failure = Some(status);
        self
    }

    /// Answer the optimize route with `status` instead of a plan.
    pub fn failing_plan(mut self, status: StatusCode) -> Self {
        self.plan_failure = Some(status);
        self
    }

    fn record(&self, route: &str, headers: &HeaderMap) {
        let provider = headers
            .get(PROVIDER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.seen.lock().unwrap().push((route.to_string(), provider));
    }

    /// `(route, provider header)` for every request served, in order.
    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, route: &str) -> usize {
        self.seen().iter().filter(|(r, _)| r == route).count()
    }
}

fn failure(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

fn hours(item: &Value) -> f64 {
    item["effort_hours"].as_f64().unwrap_or(0.0)
}

async fn sample_findings(State(stub): State<Stub>, headers: HeaderMap) -> Json<Value> {
    stub.record("findings", &headers);
    Json(json!([
        { "id": "S-1", "title": "Exposed RDP on jump host", "cvss_score": 8.8, "kev": true },
        { "id": "S-2", "title": "Stale TLS certificate", "cvss_score": 4.3 }
    ]))
}

async fn score(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    stub.record("score", &headers);
    if let Some(status) = stub.score_failure {
        return failure(status, "Model backend unavailable");
    }
    let scored: Vec<Value> = body["findings"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|f| {
            let cvss = f["cvss"].as_f64().unwrap_or(5.0);
            json!({
                "id": f["id"],
                "title": f["title"],
                "cve": f["cve"],
                "score": cvss,
                "priority": if cvss >= 9.0 { "Critical" } else { "High" },
                "effort_hours": f["effort_hours"].as_f64().unwrap_or(1.0),
                "risk_saved": cvss,
                "components": { "cvss": cvss }
            })
        })
        .collect();
    Json(json!({ "findings": scored })).into_response()
}

async fn optimize(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    stub.record("optimize", &headers);
    if let Some(status) = stub.plan_failure {
        return failure(status, "max_hours_per_wave: value is not a valid number");
    }
    let cap = body["max_hours_per_wave"].as_f64().unwrap_or(40.0);
    let mut waves: Vec<Vec<Value>> = Vec::new();
    let mut used = 0.0;
    let mut unassigned = Vec::new();
    for item in body["findings"].as_array().cloned().unwrap_or_default() {
        let h = hours(&item);
        if h > cap {
            unassigned.push(item["id"].clone());
            continue;
        }
        if waves.is_empty() || used + h > cap {
            waves.push(Vec::new());
            used = 0.0;
        }
        used += h;
        if let Some(wave) = waves.last_mut() {
            wave.push(item);
        }
    }
    let waves: Vec<Value> = waves
        .into_iter()
        .enumerate()
        .map(|(i, items)| {
            json!({
                "name": format!("Wave {}", i + 1),
                "total_hours": items.iter().map(hours).sum::<f64>(),
                "risk_saved": items.iter().map(|i| i["risk_saved"].as_f64().unwrap_or(0.0)).sum::<f64>(),
                "items": items
            })
        })
        .collect();
    Json(json!({ "waves": waves, "unassigned": unassigned })).into_response()
}

async fn map_controls(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    stub.record("map", &headers);
    let framework = body["framework"].as_str().unwrap_or("CIS").to_string();
    let findings = body["findings"].as_array().cloned().unwrap_or_default();
    let (with_cve, without): (Vec<Value>, Vec<Value>) =
        findings.into_iter().partition(|f| f["cve"].is_string());
    let mappings: Vec<Value> = with_cve
        .iter()
        .map(|f| {
            json!({
                "control": format!("{}-7.1", framework),
                "title": "Continuous vulnerability management",
                "description": "Remediate known vulnerabilities",
                "finding_id": f["id"],
                "cve": f["cve"]
            })
        })
        .collect();
    let total = mappings.len() + without.len();
    let coverage = if total == 0 { 0.0 } else { 100.0 * mappings.len() as f64 / total as f64 };
    Json(json!({
        "framework": framework,
        "coverage": coverage,
        "unique_controls": [format!("{}-7.1", framework)],
        "mappings": mappings,
        "unmapped": without.iter().map(|f| f["id"].clone()).collect::<Vec<_>>()
    }))
}

async fn impact(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    stub.record("impact", &headers);
    let waves = body["waves"].as_array().cloned().unwrap_or_default();
    let curve: Vec<Value> = waves
        .iter()
        .enumerate()
        .map(|(i, w)| {
            json!({
                "wave": w["name"],
                "cumulative_risk_saved": (i + 1) as f64 * 10.0,
                "percent_of_total": 100.0 * (i + 1) as f64 / waves.len() as f64
            })
        })
        .collect();
    Json(json!({
        "readiness_percent": 72.5,
        "compliance_boost": 12.0,
        "residual_risk": 3.3,
        "risk_saved_curve": curve,
        "controls_covered": [format!("{}-7.1", body["framework"].as_str().unwrap_or("?"))]
    }))
}

async fn summary(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    stub.record("summary", &headers);
    let count = body["findings"].as_array().map(Vec::len).unwrap_or(0);
    Json(json!({
        "path": "reports/executive_summary.html",
        "html": format!("<h1>Executive summary</h1><p>{} findings</p>", count)
    }))
}

async fn ingest(State(stub): State<Stub>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    stub.record("ingest", &headers);
    let mut name = String::new();
    let mut bytes = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            name = field.file_name().unwrap_or_default().to_string();
            bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        }
    }
    if bytes.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Uploaded file was empty");
    }
    let records: Vec<Value> = match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(e) => return failure(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    Json(json!({
        "count": records.len(),
        "sample": records.iter().take(2).cloned().collect::<Vec<_>>(),
        "envelope": {
            "intent": "ingest",
            "payload": { "source": name, "adapter": "json", "findings": records },
            "metadata": { "count": records.len(), "path": format!("uploads/{}", name) }
        }
    }))
    .into_response()
}

async fn query(State(stub): State<Stub>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    stub.record("chat", &headers);
    let provider = headers
        .get(PROVIDER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
        .to_string();
    let provider_error = (provider == "online").then_some("OpenAI API key is not configured");
    Json(json!({
        "intent": "plan",
        "response": format!("Answering: {}", body["query"].as_str().unwrap_or_default()),
        "details": {
            "matched_keywords": ["plan"],
            "confidence": 0.8,
            "endpoint": "/api/optimize/plan",
            "provider": provider,
            "provider_error": provider_error,
            "history": body["context"]["history"].as_array().map(Vec::len).unwrap_or(0)
        }
    }))
}

async fn providers() -> Json<Value> {
    Json(json!({
        "providers": [
            { "id": "local", "label": "Ollama (local)" },
            { "id": "online", "label": "OpenAI" }
        ]
    }))
}

pub fn service(stub: Stub) -> Router {
    Router::new()
        .route("/api/findings/sample", get(sample_findings))
        .route("/api/score/compute", post(score))
        .route("/api/optimize/plan", post(optimize))
        .route("/api/map/controls", post(map_controls))
        .route("/api/impact/estimate", post(impact))
        .route("/api/summary/generate", post(summary))
        .route("/api/ingest/upload", post(ingest))
        .route("/api/nl/query", post(query))
        .route("/api/ai/providers", get(providers))
        .with_state(stub)
}

/// Serve `router` on an ephemeral port and return a client pointed at it.
pub async fn serve(router: Router) -> AnalyticsClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    AnalyticsClient::with_base_url(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
}

pub async fn spawn(stub: Stub) -> AnalyticsClient {
    serve(service(stub)).await
}
