//! Audit log privacy, rotation and retention against a real log directory.

mod common;

use std::time::Duration;

use kiosk_core::audit::{event_types, AuditLogger, EventFilter};
use kiosk_core::printing::PrintOptionsInput;
use kiosk_core::types::AuditConfig;
use pretty_assertions::assert_eq;
use serde_json::json;

fn read_dir_text(dir: &std::path::Path) -> String {
    let mut text = String::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_file() {
            text.push_str(&std::fs::read_to_string(path).unwrap_or_default());
        }
    }
    text
}

#[tokio::test]
async fn test_nested_pii_never_reaches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, _) = common::agent(dir.path()).await;
    let session = agent.sessions().create_session().await.unwrap();

    agent
        .audit()
        .log_event(
            Some(&session),
            event_types::FILE_UPLOADED,
            json!({
                "jobDetails": {
                    "fileInfo": {
                        "originalName": "secret.pdf",
                        "size": 1024,
                        "metadata": {"customerPhone": "9876543210", "pageCount": 5}
                    }
                }
            }),
        )
        .await
        .unwrap();

    let events = agent
        .audit()
        .read_events(&EventFilter::of_type(event_types::FILE_UPLOADED))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].metadata,
        json!({"jobDetails": {"fileInfo": {"size": 1024, "metadata": {"pageCount": 5}}}})
    );

    let raw = read_dir_text(agent.audit().log_dir());
    assert!(!raw.contains("secret.pdf"));
    assert!(!raw.contains("9876543210"));
}

#[tokio::test]
async fn test_full_flow_keeps_file_names_out_of_logs() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, _) = common::agent(dir.path()).await;
    let session = agent.sessions().create_session().await.unwrap();
    let file = agent
        .sessions()
        .add_file(&session, "Priya Sharma passport.pdf", "application/pdf", b"%PDF-1.4")
        .await
        .unwrap();
    let job = agent
        .jobs()
        .create_print_job(&session, vec![file.id], &PrintOptionsInput::default())
        .await
        .unwrap();
    agent.jobs().execute_print_job(&job.id).await.unwrap();
    agent.sessions().terminate_session(&session).await.unwrap();

    let raw = read_dir_text(agent.audit().log_dir());
    assert!(raw.contains(event_types::JOB_COMPLETED));
    assert!(!raw.contains("Priya"));
    assert!(!raw.contains("passport"));
}

#[tokio::test]
async fn test_rotation_and_retention_survive_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("audit");
    let audit = AuditLogger::new(AuditConfig {
        log_dir: log_dir.clone(),
        max_file_size_bytes: 256,
        retention: Duration::from_millis(50),
        ..Default::default()
    })
    .await
    .unwrap();

    // A zero-length rotated file and a corrupted active log.
    std::fs::write(log_dir.join("audit.20200101T000000Z.log"), b"").unwrap();
    std::fs::write(log_dir.join("audit.log"), b"{not json\n\x00\x01\n").unwrap();

    for i in 0..20 {
        audit
            .log_system_event(event_types::ERROR_OCCURRED, json!({"attempt": i}))
            .await
            .unwrap();
    }
    let events = audit.read_events(&EventFilter::default()).await.unwrap();
    assert_eq!(events.len(), 20);

    let stats = audit.get_audit_statistics().await.unwrap();
    assert!(stats.file_count > 1, "expected rotated files");
    assert!(stats.corrupt_lines >= 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let purged = audit.cleanup_old_logs().await.unwrap();
    assert!(purged.files_deleted >= 1);

    // The directory may vanish under the logger; the next write recreates it.
    std::fs::remove_dir_all(&log_dir).unwrap();
    audit
        .log_system_event(event_types::LOGS_PURGED, json!({}))
        .await
        .unwrap();
    assert!(log_dir.join("audit.log").is_file());
}
