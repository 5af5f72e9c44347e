//! Integration tests for the promo-send daemon

use assert_cmd::Command;
use libpromocast::{Campaign, CampaignService, CatalogItem, Credential, Database, JobStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Write a config with a single webhook platform "x" and initialize the database
async fn setup_test_env(endpoint: &str) -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[dispatch]
poll_interval = 1
attempt_timeout = "5s"

[platforms.x]
kind = "webhook"
endpoint = "{}"
"#,
        db_path.display().to_string().replace('\\', "/"),
        endpoint
    );
    fs::write(&config_path, config_content).unwrap();

    let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

/// Activate a one-slot campaign whose only job fell due yesterday
async fn create_due_campaign(db_path: &str) -> String {
    let db = Database::new(db_path).await.unwrap();

    db.upsert_catalog_item(&CatalogItem {
        id: "book-1".to_string(),
        title: "The Rust Book".to_string(),
        blurb: "Ownership, explained.".to_string(),
        link: None,
        media_ref: None,
    })
    .await
    .unwrap();
    db.upsert_credential(&Credential::new("user-1", "x", "@books", "secret-token"))
        .await
        .unwrap();

    let yesterday = chrono::Utc::now().date_naive().pred_opt().unwrap();
    let mut campaign = Campaign::draft("user-1", "Daemon test", yesterday);
    campaign.posting_times = vec!["00:00".to_string()];
    campaign.platforms = vec!["x".to_string()];
    campaign.items = vec!["book-1".to_string()];
    campaign.content_ratio = 100;

    let service = CampaignService::new(db);
    service.create(&campaign).await.unwrap();
    service.activate(&campaign.id).await.unwrap();
    campaign.id
}

#[test]
fn test_help_flag() {
    let mut cmd = Command::cargo_bin("promo-send").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Background daemon for campaign publishing"))
        .stdout(predicate::str::contains("--poll-interval"))
        .stdout(predicate::str::contains("--once"));
}

#[test]
fn test_missing_config_is_a_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("promo-send").unwrap();
    cmd.env("PROMOCAST_CONFIG", temp_dir.path().join("missing.toml"))
        .arg("--once")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_once_publishes_due_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/publish"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "remote-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let (_temp_dir, config_path, db_path) = setup_test_env(&format!("{}/publish", server.uri())).await;
    let campaign_id = create_due_campaign(&db_path).await;

    let mut cmd = Command::cargo_bin("promo-send").unwrap();
    cmd.env("PROMOCAST_CONFIG", &config_path)
        .args(["--once", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"jobs_published\":1"));

    let db = Database::new(&db_path).await.unwrap();
    let jobs = db.list_posts(&campaign_id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Published);
    assert_eq!(jobs[0].provider_post_id.as_deref(), Some("remote-1"));

    let campaign = db.get_campaign(&campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.status, libpromocast::CampaignStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_once_requeues_on_provider_outage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (_temp_dir, config_path, db_path) = setup_test_env(&server.uri()).await;
    let campaign_id = create_due_campaign(&db_path).await;

    let mut cmd = Command::cargo_bin("promo-send").unwrap();
    cmd.env("PROMOCAST_CONFIG", &config_path)
        .args(["--once", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"jobs_deferred\":1"));

    let db = Database::new(&db_path).await.unwrap();
    let job = &db.list_posts(&campaign_id).await.unwrap()[0];
    assert_eq!(job.status, JobStatus::Scheduled);
    assert!(job.last_error.as_deref().unwrap().contains("HTTP 503"));
}
