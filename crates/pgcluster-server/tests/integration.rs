use async_trait::async_trait;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use pgcluster_core::config::Config;
use pgcluster_core::process::{CommandOutput, CommandRunner, Invocation};
use pgcluster_server::state::AppState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Stand-in for terraform and ansible-playbook. Responses are keyed by the
/// first argument (`init`, `plan`, `apply`, `output`, `-i`); anything not
/// scripted succeeds with empty output.
#[derive(Default)]
struct FakeTools {
    scripted: Mutex<HashMap<String, (i32, String)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTools {
    fn script(&self, first_arg: &str, exit_code: i32, stdout: &str) {
        self.scripted
            .lock()
            .unwrap()
            .insert(first_arg.to_string(), (exit_code, stdout.to_string()));
    }
}

#[async_trait]
impl CommandRunner for FakeTools {
    async fn run(&self, invocation: &Invocation) -> pgcluster_core::Result<CommandOutput> {
        let key = invocation.args.first().cloned().unwrap_or_default();
        self.calls.lock().unwrap().push(invocation.display());
        let (exit_code, stdout) = self
            .scripted
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or((0, String::new()));
        Ok(CommandOutput {
            stdout,
            stderr: if exit_code == 0 { String::new() } else { format!("Error: {key} failed") },
            exit_code: Some(exit_code),
            ..CommandOutput::default()
        })
    }
}

const TWO_REPLICA_OUTPUTS: &str = r#"{
    "primary_db_public_ip": {"sensitive": false, "type": "string", "value": "10.0.0.1"},
    "replica_db_public_ips": {"sensitive": false, "type": ["tuple", ["string", "string"]],
                              "value": ["10.0.0.2", "10.0.0.3"]}
}"#;

fn app(dir: &TempDir, tools: Arc<FakeTools>) -> axum::Router {
    let state = AppState::with_runner(Config::new(dir.path()), tools);
    pgcluster_server::router_with_state(state)
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    send(app, req).await
}

/// Send a POST request with a raw body via `oneshot` and return (status, parsed JSON body).
async fn post_raw(app: axum::Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(
    app: axum::Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_raw(app, uri, &body.to_string()).await
}

async fn send(
    app: axum::Router,
    req: axum::http::Request<axum::body::Body>,
) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn read_json(path: std::path::PathBuf) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok() {
    let dir = TempDir::new().unwrap();
    let (status, body) = get(app(&dir, Arc::default()), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn status_of_empty_working_tree() {
    let dir = TempDir::new().unwrap();
    let (status, body) = get(app(&dir, Arc::default()), "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["busy"], false);
    assert_eq!(body["descriptor_present"], false);
    assert!(body["manifest"].is_null());
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn descriptor_with_empty_body_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_raw(app(&dir, Arc::default()), "/api/descriptor", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["machine_class"], "t2.micro");
    assert_eq!(body["request"]["replica_count"], 1);

    let infra = read_json(dir.path().join("terraform/main.tf.json"));
    assert_eq!(infra["resource"]["aws_instance"]["replica_db"]["count"], 1);
    assert_eq!(
        infra["resource"]["aws_instance"]["primary_db"]["instance_type"],
        "t2.micro"
    );
}

#[tokio::test]
async fn descriptor_with_zero_replicas() {
    let dir = TempDir::new().unwrap();
    let (status, _) = post_json(
        app(&dir, Arc::default()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "t3.medium", "replica_count": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let infra = read_json(dir.path().join("terraform/main.tf.json"));
    assert_eq!(infra["resource"]["aws_instance"]["replica_db"]["count"], 0);
}

#[tokio::test]
async fn descriptor_rejects_malformed_fields() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        app(&dir, Arc::default()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "t2.micro", "replica_count": "two" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = post_json(
        app(&dir, Arc::default()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "\"; rm -rf /" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
    assert!(!dir.path().join("terraform/main.tf.json").exists());
}

#[tokio::test]
async fn second_descriptor_replaces_the_first() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    post_json(
        app(&dir, tools.clone()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "t3.large", "replica_count": 4 }),
    )
    .await;
    post_json(
        app(&dir, tools),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "t3.small", "replica_count": 1 }),
    )
    .await;
    let infra = read_json(dir.path().join("terraform/main.tf.json"));
    let replica = &infra["resource"]["aws_instance"]["replica_db"];
    assert_eq!(replica["count"], 1);
    assert_eq!(replica["instance_type"], "t3.small");
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_phase_by_phase() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    tools.script("output", 0, TWO_REPLICA_OUTPUTS);

    let (status, _) = post_json(
        app(&dir, tools.clone()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "small-2vcpu", "replica_count": 2 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_raw(app(&dir, tools.clone()), "/api/plan", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phases"][0]["phase"], "init");
    assert_eq!(body["phases"][1]["phase"], "plan");

    let (status, body) = post_raw(app(&dir, tools.clone()), "/api/apply", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phases"][0]["succeeded"], true);

    let (status, body) = post_raw(app(&dir, tools.clone()), "/api/inventory", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inventory"]["primary"]["address"], "10.0.0.1");
    assert_eq!(body["inventory"]["replicas"][0]["address"], "10.0.0.2");
    assert_eq!(body["inventory"]["replicas"][1]["address"], "10.0.0.3");
    let hosts = std::fs::read_to_string(dir.path().join("ansible/inventory/hosts.yml")).unwrap();
    assert!(hosts.contains("10.0.0.1"));
    assert!(hosts.contains("10.0.0.3"));

    let (status, body) = post_json(
        app(&dir, tools.clone()),
        "/api/config",
        serde_json::json!({ "max_connections": 100, "shared_buffers": "256MB" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phases"][0]["phase"], "render_config");
    assert_eq!(body["phases"][1]["phase"], "run_config");

    let playbook = std::fs::read_to_string(dir.path().join("ansible/main.yml")).unwrap();
    assert!(playbook.contains("max_connections = 100"));
    assert!(playbook.contains("256MB"));

    let calls = tools.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 5);
    assert!(calls[4].starts_with("ansible-playbook -i "));
}

#[tokio::test]
async fn provision_runs_every_phase() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    tools.script("output", 0, TWO_REPLICA_OUTPUTS);

    let (status, body) = post_json(
        app(&dir, tools),
        "/api/provision",
        serde_json::json!({
            "request": { "machine_class": "small-2vcpu", "replica_count": 2 },
            "tuning": { "max_connections": "150" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let phases: Vec<&str> = body["phases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["phase"].as_str().unwrap())
        .collect();
    assert_eq!(
        phases,
        vec!["init", "plan", "apply", "derive_inventory", "render_config", "run_config"]
    );
    let playbook = std::fs::read_to_string(dir.path().join("ansible/main.yml")).unwrap();
    assert!(playbook.contains("max_connections = 150"));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inventory_before_apply_is_422() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    post_raw(app(&dir, tools.clone()), "/api/descriptor", "").await;
    let (status, body) = post_raw(app(&dir, tools), "/api/inventory", "").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "inventory_derivation_failure");
}

#[tokio::test]
async fn failed_apply_reports_phase_and_diagnostics() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    tools.script("apply", 1, "aws_instance.primary_db: Creating...");
    post_raw(app(&dir, tools.clone()), "/api/descriptor", "").await;

    let (status, body) = post_raw(app(&dir, tools), "/api/apply", "").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "provisioning_failure");
    assert_eq!(body["phase"], "apply");
    assert_eq!(body["exit_code"], 1);
    assert_eq!(body["stderr"], "Error: apply failed");
    assert_eq!(body["stdout"], "aws_instance.primary_db: Creating...");
}

#[tokio::test]
async fn plan_without_descriptor_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_raw(app(&dir, Arc::default()), "/api/plan", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_request");
}

#[tokio::test]
async fn malformed_tuning_is_render_failure() {
    let dir = TempDir::new().unwrap();
    let tools: Arc<FakeTools> = Arc::default();
    tools.script("output", 0, TWO_REPLICA_OUTPUTS);
    post_json(
        app(&dir, tools.clone()),
        "/api/descriptor",
        serde_json::json!({ "replica_count": 2 }),
    )
    .await;
    post_raw(app(&dir, tools.clone()), "/api/apply", "").await;
    post_raw(app(&dir, tools.clone()), "/api/inventory", "").await;

    let (status, body) = post_json(
        app(&dir, tools.clone()),
        "/api/config",
        serde_json::json!({ "max_connections": "many" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "render_failure");
    assert!(!tools
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.starts_with("ansible-playbook")));
}

#[tokio::test]
async fn busy_working_tree_is_409_and_untouched() {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path());
    post_raw(app(&dir, Arc::default()), "/api/descriptor", "").await;
    let before = std::fs::read_to_string(dir.path().join("terraform/main.tf.json")).unwrap();

    let _held = pgcluster_core::lock::WorkingTreeHandle::acquire(&config).unwrap();
    let (status, body) = post_json(
        app(&dir, Arc::default()),
        "/api/descriptor",
        serde_json::json!({ "machine_class": "t3.large", "replica_count": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "busy");

    let after = std::fs::read_to_string(dir.path().join("terraform/main.tf.json")).unwrap();
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// Real listener
// ---------------------------------------------------------------------------

fn write_script(path: &std::path::Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

#[tokio::test]
async fn client_disconnect_does_not_cancel_apply() {
    use tokio::io::AsyncWriteExt;

    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("apply-finished");
    let terraform = dir.path().join("terraform-stub");
    write_script(
        &terraform,
        &format!(
            r#"if [ "$1" = apply ]; then sleep 2; touch '{}'; fi
echo "terraform $1 ok""#,
            marker.display()
        ),
    );

    let mut config = Config::new(dir.path());
    config.terraform_bin = terraform.display().to_string();
    pgcluster_core::Orchestrator::new(config.clone())
        .generate_descriptor(Default::default())
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(pgcluster_server::serve_on(config.clone(), listener));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /api/apply HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    drop(stream);

    let manifest_path = pgcluster_core::paths::manifest_path(&config.terraform_dir());
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    let mut applied = false;
    while std::time::Instant::now() < deadline {
        let manifest = pgcluster_core::manifest::RunManifest::load(&manifest_path).unwrap();
        if marker.exists() && manifest.and_then(|m| m.apply_id).is_some() {
            applied = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    server.abort();

    assert!(marker.exists(), "terraform apply was killed with the request");
    assert!(applied, "apply id was never recorded");
}
