//! HTTP surface against a real listener.

use std::sync::Arc;

use dockfleet_fleetd::{
    api,
    clock::SystemClock,
    reconciler::ReconciliationEngine,
    runtime::{MockRuntime, StaticConnector},
    state::AppState,
    FleetController,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct ApiFixture {
    base_url: String,
    runtime: Arc<MockRuntime>,
    client: reqwest::Client,
}

impl ApiFixture {
    async fn request(&self, name: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/requests/{name}", self.base_url))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

async fn start_api() -> ApiFixture {
    let runtime = Arc::new(MockRuntime::new());
    let controller = FleetController::new(
        Arc::new(StaticConnector::new(runtime.clone())),
        Arc::new(SystemClock),
        ReconciliationEngine::default(),
    );
    let app = api::create_router(AppState::new(controller));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{addr}");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ApiFixture {
        base_url,
        runtime,
        client: reqwest::Client::new(),
    }
}

fn profile(max: u32) -> Value {
    json!({
        "image": "gocd/gocd-agent-alpine:v24.1.0",
        "max_docker_containers": max.to_string(),
        "go_server_url": "https://ci.example.com/go"
    })
}

#[tokio::test]
async fn agent_lifecycle_over_http() {
    let api = start_api().await;

    let resp = api
        .request(
            "cd.go.elastic-agent.should-assign-work",
            json!({ "cluster_profile_properties": profile(1), "job_id": "p/1/s/1/j1" }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!(false));

    let resp = api
        .request(
            "cd.go.elastic-agent.create-agent",
            json!({ "cluster_profile_properties": profile(1), "job_id": "p/1/s/1/j1", "environment": "prod" }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let agent: Value = resp.json().await.unwrap();
    assert_eq!(agent["state"], "provisioning");
    assert!(agent["name"].as_str().unwrap().starts_with("agent_"));
    assert_eq!(api.runtime.create_calls(), 1);

    let resp = api
        .request(
            "cd.go.elastic-agent.assign-work",
            json!({ "cluster_profile_properties": profile(1), "job_id": "p/1/s/1/j1" }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let assigned: Value = resp.json().await.unwrap();
    assert_eq!(assigned["state"], "assigned");
    assert_eq!(assigned["current_job_id"], "p/1/s/1/j1");
    assert_eq!(assigned["instance_id"], agent["instance_id"]);

    // At capacity: the only instance is busy.
    let resp = api
        .request(
            "cd.go.elastic-agent.create-agent",
            json!({ "cluster_profile_properties": profile(1), "job_id": "p/1/s/1/j2" }),
        )
        .await;
    assert_eq!(resp.status(), 429);
    assert_eq!(
        resp.headers()["content-type"],
        "application/problem+json"
    );
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "capacity_exceeded");
    assert_eq!(problem["retryable"], true);

    let resp = api
        .request(
            "cd.go.elastic-agent.job-completion",
            json!({ "cluster_profile_properties": profile(1), "job_id": "p/1/s/1/j1" }),
        )
        .await;
    assert_eq!(resp.status(), 200);

    let resp = api
        .request(
            "cd.go.elastic-agent.server-ping",
            json!({ "all_cluster_profile_properties": [profile(1)] }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let ping: Value = resp.json().await.unwrap();
    assert_eq!(ping["reconciled"], 1);
    assert_eq!(ping["failures"], json!([]));

    let clusters: Value = api
        .client
        .get(format!("{}/v1/clusters", api.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = clusters["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["instances"][0]["state"], "idle");
    assert_eq!(items[0]["max_instances"], 1);
    assert_eq!(items[0]["headroom"], 0);
    assert_eq!(items[0]["accepting"], false);

    let identity = items[0]["identity"].as_str().unwrap();
    let resp = api
        .client
        .get(format!("{}/v1/clusters/{identity}", api.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unknown_request_touches_nothing() {
    let api = start_api().await;

    let resp = api
        .request(
            "cd.go.elastic-agent.get-profile-view",
            json!({ "cluster_profile_properties": profile(1) }),
        )
        .await;
    assert_eq!(resp.status(), 404);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "unknown_request");

    let clusters: Value = api
        .client
        .get(format!("{}/v1/clusters", api.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(clusters["items"], json!([]));
    assert_eq!(api.runtime.list_calls(), 0);
}

#[tokio::test]
async fn bad_payloads_are_client_errors() {
    let api = start_api().await;

    let resp = api
        .request(
            "cd.go.elastic-agent.assign-work",
            json!({ "cluster_profile_properties": profile(1) }),
        )
        .await;
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["code"], "invalid_request");

    let resp = api
        .request(
            "cd.go.elastic-agent.create-agent",
            json!({ "cluster_profile_properties": { "image": "agent" }, "job_id": "j" }),
        )
        .await;
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["code"], "invalid_settings");

    let resp = api
        .client
        .post(format!(
            "{}/v1/requests/cd.go.elastic-agent.job-completion",
            api.base_url
        ))
        .body("{")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn runtime_failures_map_to_gateway_errors() {
    let api = start_api().await;

    api.runtime.set_reject_creates(true);
    let resp = api
        .request(
            "cd.go.elastic-agent.create-agent",
            json!({ "cluster_profile_properties": profile(1), "job_id": "j" }),
        )
        .await;
    assert_eq!(resp.status(), 502);

    api.runtime.set_unavailable(true);
    let resp = api
        .request(
            "cd.go.elastic-agent.should-assign-work",
            json!({ "cluster_profile_properties": profile(1), "job_id": "j" }),
        )
        .await;
    assert_eq!(resp.status(), 503);
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["code"], "runtime_unavailable");
    assert_eq!(problem["retryable"], true);
}

#[tokio::test]
async fn request_ids_are_propagated() {
    let api = start_api().await;

    let resp = api
        .client
        .post(format!("{}/v1/requests/nope", api.base_url))
        .header("x-request-id", "req_from_server")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req_from_server");
    let problem: Value = resp.json().await.unwrap();
    assert_eq!(problem["request_id"], "req_from_server");

    let resp = api
        .client
        .get(format!("{}/livez", api.base_url))
        .send()
        .await
        .unwrap();
    let generated = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(generated.starts_with("req_"));
}

#[tokio::test]
async fn health_endpoints() {
    let api = start_api().await;

    for path in ["/healthz", "/livez"] {
        let resp = api
            .client
            .get(format!("{}{path}", api.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "fleetd");
    }

    let resp = api
        .client
        .get(format!("{}/v1/clusters/not-an-identity", api.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = api
        .client
        .get(format!(
            "{}/v1/clusters/cl_00000000000000000000000000000000",
            api.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
