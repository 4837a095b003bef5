//! Integration tests for the pipeline REST API.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! store and drives it over HTTP with reqwest.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use lead_outreach::api::{AppState, api_routes};
use lead_outreach::config::OutreachConfig;
use lead_outreach::pipeline::{DefaultProcessors, Orchestrator};
use lead_outreach::store::{LeadStore, LibSqlBackend};

/// Maximum time any test is allowed to wait for a run to finish.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outreach settings that let a dry run finish in milliseconds.
fn fast_outreach() -> OutreachConfig {
    OutreachConfig {
        rate_limit_per_minute: 1000,
        min_spacing: Duration::from_millis(1),
        backoff_base: Duration::from_millis(1),
        ..OutreachConfig::default()
    }
}

/// Start an Axum server on a random port, return its base URL.
async fn start_server(outreach: OutreachConfig) -> String {
    let store: Arc<dyn LeadStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let default_dry_run = outreach.dry_run;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::new(DefaultProcessors::new(outreach)),
    ));
    let app = api_routes(AppState {
        orchestrator,
        store,
        default_dry_run,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

/// Poll `/pipeline/status` until the run is no longer active.
async fn wait_for_idle(client: &reqwest::Client, base: &str) -> Value {
    timeout(TEST_TIMEOUT, async {
        loop {
            let status: Value = client
                .get(format!("{base}/pipeline/status"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["running"] == false {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("pipeline run did not finish in time")
}

fn lead_body(email: &str) -> Value {
    json!({
        "full_name": "Ada Lovelace",
        "company_name": "Analytical Engines",
        "role_title": "CTO",
        "industry": "Technology",
        "company_website": "https://www.analyticalengines.com",
        "email": email,
        "linkedin_url": "https://www.linkedin.com/in/ada-lovelace",
        "country": "United Kingdom"
    })
}

#[tokio::test]
async fn health_and_service_info() {
    let base = start_server(fast_outreach()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let info: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(info["service"], "lead-outreach");
}

#[tokio::test]
async fn bulk_run_completes_and_leads_are_listed() {
    let base = start_server(fast_outreach()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/pipeline/run"))
        .json(&json!({"lead_count": 3, "channel": "email"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["message"], "Pipeline started");
    assert_eq!(accepted["config"]["dry_run"], true);
    assert_eq!(accepted["config"]["mode"]["count"], 3);

    let status = wait_for_idle(&client, &base).await;
    assert_eq!(status["current_stage"], "Complete");
    assert_eq!(status["progress"], 100);
    assert!(status["error"].is_null());

    let sent: Value = client
        .get(format!("{base}/leads?status=sent"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent["total"], 3);

    let id = sent["leads"][0]["id"].as_i64().unwrap();
    let detail: Value = client
        .get(format!("{base}/leads/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["lead"]["status"], "SENT");
    assert!(detail["enrichment"]["persona_tag"].is_string());
    assert!(detail["messages"]["email_a"]["subject"].is_string());
    assert_eq!(detail["dispatch_results"].as_array().unwrap().len(), 1);

    let metrics: Value = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["store"]["total_leads"], 3);
    assert_eq!(metrics["pipeline"]["running"], false);

    let page: Value = client
        .get(format!("{base}/leads?limit=2&offset=2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 3);
    assert_eq!(page["leads"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn second_run_conflicts_until_stopped() {
    // default spacing keeps the first run busy for several seconds
    let base = start_server(OutreachConfig::default()).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/pipeline/run"))
        .json(&json!({"lead_count": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = client
        .post(format!("{base}/pipeline/run"))
        .json(&json!({"lead_count": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let clear = client.delete(format!("{base}/leads")).send().await.unwrap();
    assert_eq!(clear.status(), StatusCode::CONFLICT);

    let stop: Value = client
        .post(format!("{base}/pipeline/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stop["stopped"], true);

    let again: Value = client
        .post(format!("{base}/pipeline/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["stopped"], false);

    let status = wait_for_idle(&client, &base).await;
    assert!(status["current_stage"].is_null());
}

#[tokio::test]
async fn single_lead_intake_then_clear() {
    let base = start_server(fast_outreach()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/leads"))
        .json(&lead_body("ada@analyticalengines.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    wait_for_idle(&client, &base).await;

    let leads: Value = client
        .get(format!("{base}/leads"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(leads["total"], 1);
    assert_eq!(leads["leads"][0]["status"], "SENT");
    assert_eq!(leads["leads"][0]["source"], "external");

    let clear = client.delete(format!("{base}/leads")).send().await.unwrap();
    assert_eq!(clear.status(), StatusCode::OK);

    let leads: Value = client
        .get(format!("{base}/leads"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(leads["total"], 0);
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let base = start_server(fast_outreach()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/leads?status=DONE"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.get(format!("{base}/leads/999")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .post(format!("{base}/leads"))
        .json(&lead_body("not-an-email"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{base}/pipeline/run"))
        .json(&json!({"lead_count": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // no run was ever accepted
    let status: Value = client
        .get(format!("{base}/pipeline/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status["run_id"].is_null());
}

#[tokio::test]
async fn stages_driven_one_request_at_a_time() {
    let base = start_server(fast_outreach()).await;
    let client = reqwest::Client::new();

    let generated: Value = client
        .post(format!("{base}/stages/generate"))
        .json(&json!({"count": 3, "seed": 7}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(generated["intaken"], 3);
    assert_eq!(generated["validation"]["valid_emails"], 3);

    let enriched: Value = client
        .post(format!("{base}/stages/enrich"))
        .json(&json!({"mode": "offline", "limit": 2}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(enriched["enriched"], 2);

    // no body: every ENRICHED lead
    let messaged: Value = client
        .post(format!("{base}/stages/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messaged["messaged"], 2);

    let sent: Value = client
        .post(format!("{base}/stages/send"))
        .json(&json!({"channel": "email"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent["sent"], 2);

    let metrics: Value = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["store"]["total_leads"], 3);
    assert_eq!(metrics["store"]["status_breakdown"]["NEW"], 1);
    assert_eq!(metrics["store"]["status_breakdown"]["SENT"], 2);

    let resp = client
        .post(format!("{base}/stages/enrich"))
        .json(&json!({"limit": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
