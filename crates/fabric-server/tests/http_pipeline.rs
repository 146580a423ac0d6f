//! Full-pipeline tests, driven through the assembled router rather than by
//! calling service methods directly — these exercise auth, rate limiting,
//! the write guard, and route dispatch together, the way a real client
//! would hit the server.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use uuid::Uuid;

use fabric_core::ha::HaConfig;
use fabric_core::identity::{generate_token, hash_token};
use fabric_core::models::{ReplicaRole, MAX_BUNDLE_BYTES};
use fabric_core::ratelimit::{RateLimitConfig, RateLimiter};
use fabric_store::Store;

use fabric_server::config::{LogFormat, ServerConfig};
use fabric_server::ha::HaCoordinator;
use fabric_server::routes::build_router;
use fabric_server::state::AppState;
use fabric_server::supervisor::Supervisor;

const HMAC_SECRET: &[u8] = b"integration-test-hmac-secret-of-32-bytes!!";

fn test_config(instance_id: &str, address: &str, mode: ReplicaRole, db_path: &str) -> ServerConfig {
    ServerConfig {
        instance_id: instance_id.to_owned(),
        address: address.to_owned(),
        mode,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        database_path: db_path.to_owned(),
        hmac_secret: HMAC_SECRET.to_vec(),
        log_level: "error".to_owned(),
        log_format: LogFormat::Json,
        cors_origins: vec!["*".to_owned()],
        disable_write_guard: false,
        disable_mlock: true,
        heartbeat_interval: Duration::from_secs(10),
        heartbeat_threshold: Duration::from_secs(30),
        prune_interval: Duration::from_secs(300),
        prune_multiplier: 2,
        supervisor_tick_interval: Duration::from_secs(5),
        supervisor_base_dir: std::env::temp_dir()
            .join(format!("fabric-test-lighthouse-{instance_id}"))
            .to_string_lossy()
            .into_owned(),
        lighthouse_binary: "nebula".to_owned(),
        rate_limit_eviction_interval: Duration::from_secs(300),
        rate_limit_idle_threshold: Duration::from_secs(3600),
    }
}

/// Build a router over a fresh `AppState`, starting HA for this instance.
async fn build_app(store: Arc<Store>, config: ServerConfig) -> Router {
    let config = Arc::new(config);
    let ha_config = HaConfig {
        instance_id: config.instance_id.clone(),
        address: config.address.clone(),
        mode: config.mode,
        heartbeat_interval: config.heartbeat_interval,
        heartbeat_threshold: config.heartbeat_threshold,
        prune_interval: config.prune_interval,
        prune_multiplier: config.prune_multiplier,
    };
    let ha = Arc::new(HaCoordinator::new(Arc::clone(&store), ha_config));
    ha.start().await.expect("HA startup should not collide in a fresh store");

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&store),
        config.instance_id.clone(),
        std::path::PathBuf::from(&config.supervisor_base_dir),
        config.lighthouse_binary.clone(),
    ));

    let state = Arc::new(AppState::new(store, ha, supervisor, rate_limiter, config));
    build_router(state)
}

async fn fresh_store() -> (Arc<Store>, NamedTempFile) {
    let db = NamedTempFile::new().unwrap();
    let store = Arc::new(Store::connect(db.path().to_str().unwrap()).await.unwrap());
    (store, db)
}

/// Create a tenant, a cluster, and one admin node directly against the
/// store, as an out-of-band provisioning step would — there is no HTTP
/// route for minting the very first admin node of a cluster.
async fn bootstrap_admin_node(store: &Store) -> (Uuid, Uuid, String) {
    let tenant = store.create_tenant("Acme").await.unwrap();
    let cluster_token = generate_token();
    let cluster = store
        .create_cluster(
            tenant.id,
            "prod",
            &hash_token(HMAC_SECRET, &cluster_token),
            false,
            None,
        )
        .await
        .unwrap();
    let admin_token = generate_token();
    let node = store
        .create_node(
            tenant.id,
            cluster.id,
            "admin-0",
            true,
            &hash_token(HMAC_SECRET, &admin_token),
            1300,
        )
        .await
        .unwrap();
    (cluster.id, node.id, admin_token)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn build_valid_bundle_archive() -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (name, content) in [
            ("config.yml", b"lighthouse:\n  am_lighthouse: true\n".as_slice()),
            ("ca.crt", b"ca-cert-bytes".as_slice()),
            ("crl.pem", b"crl-bytes".as_slice()),
            ("host.crt", b"host-cert-bytes".as_slice()),
            ("host.key", b"host-key-bytes".as_slice()),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, content).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn health_live_requires_no_auth() {
    let (store, _db) = fresh_store().await;
    let app = build_app(store, test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let response = app
        .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn solo_instance_reports_itself_master() {
    let (store, _db) = fresh_store().await;
    let app = build_app(store, test_config("solo", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let response = app
        .oneshot(Request::builder().uri("/health/master").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_master"], json!(true));
    assert_eq!(body["instance_id"], json!("solo"));
}

#[tokio::test]
async fn node_enrollment_round_trips_through_the_router() {
    let (store, _db) = fresh_store().await;
    let (cluster_id, _admin_id, admin_token) = bootstrap_admin_node(&store).await;
    let app = build_app(Arc::clone(&store), test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let version_before = store.get_cluster(cluster_id).await.unwrap().config_version;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/nodes/")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "edge-1", "is_admin": false, "mtu": 1300}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert!(created["token"].as_str().unwrap().len() >= fabric_core::identity::MIN_TOKEN_LEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/nodes/")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let nodes = body_json(response).await;
    assert_eq!(nodes.as_array().unwrap().len(), 2);

    let version_after = store.get_cluster(cluster_id).await.unwrap().config_version;
    assert_eq!(version_after, version_before + 1);
}

#[tokio::test]
async fn unknown_node_token_is_rejected_with_401() {
    let (store, _db) = fresh_store().await;
    bootstrap_admin_node(&store).await;
    let app = build_app(store, test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/nodes/")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, generate_token())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("unauthorized"));
}

#[tokio::test]
async fn replica_rejects_mutation_with_503_and_master_address() {
    let (store, _db) = fresh_store().await;
    let (_cluster_id, _admin_id, admin_token) = bootstrap_admin_node(&store).await;

    // Seed a live master before this instance starts as a replica, so the
    // election does not fall back to self.
    let master_ha = HaCoordinator::new(
        Arc::clone(&store),
        HaConfig {
            instance_id: "m".to_owned(),
            address: "10.0.0.9:7700".to_owned(),
            mode: ReplicaRole::Master,
            ..HaConfig::default()
        },
    );
    master_ha.start().await.unwrap();

    let app = build_app(
        Arc::clone(&store),
        test_config("r", "10.0.0.2:7700", ReplicaRole::Replica, "unused"),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/nodes/")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "edge-2", "is_admin": false, "mtu": 1300}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get("X-Fabric-Master-Address").unwrap(),
        "10.0.0.9:7700"
    );
}

#[tokio::test]
async fn bundle_upload_then_conditional_download_round_trips() {
    let (store, _db) = fresh_store().await;
    let (cluster_id, _admin_id, admin_token) = bootstrap_admin_node(&store).await;
    let app = build_app(Arc::clone(&store), test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let archive = build_valid_bundle_archive();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/config/bundle")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .header(header::CONTENT_TYPE, "application/gzip")
                .body(Body::from(archive))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let uploaded = body_json(response).await;
    let version = uploaded["version"].as_i64().unwrap();
    assert_eq!(version, store.get_cluster(cluster_id).await.unwrap().config_version);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/v1/config/bundle?current_version={version}"))
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn oversize_bundle_upload_is_rejected_with_413() {
    let (store, _db) = fresh_store().await;
    let (cluster_id, _admin_id, admin_token) = bootstrap_admin_node(&store).await;
    let app = build_app(Arc::clone(&store), test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let version_before = store.get_cluster(cluster_id).await.unwrap().config_version;
    let oversized = vec![0u8; MAX_BUNDLE_BYTES + 1];

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/config/bundle")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, admin_token.as_str())
                .header(header::CONTENT_TYPE, "application/gzip")
                .body(Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("payload_too_large"));

    let version_after = store.get_cluster(cluster_id).await.unwrap().config_version;
    assert_eq!(version_after, version_before, "rejected upload must not bump config_version");
}

#[tokio::test]
async fn non_admin_node_token_cannot_create_nodes() {
    let (store, _db) = fresh_store().await;
    let (tenant_id, cluster_id, _admin_token) = {
        let (cid, _, tok) = bootstrap_admin_node(&store).await;
        let cluster = store.get_cluster(cid).await.unwrap();
        (cluster.tenant_id, cid, tok)
    };
    let plain_token = generate_token();
    store
        .create_node(tenant_id, cluster_id, "edge-3", false, &hash_token(HMAC_SECRET, &plain_token), 1300)
        .await
        .unwrap();

    let app = build_app(store, test_config("a", "10.0.0.1:7700", ReplicaRole::Master, "unused")).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/nodes/")
                .header(fabric_server::middleware::auth::NODE_TOKEN_HEADER, plain_token.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"name": "edge-4", "is_admin": false, "mtu": 1300}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
