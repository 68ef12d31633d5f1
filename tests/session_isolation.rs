//! Session isolation under concurrent creation.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use kiosk_core::session::SessionStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_are_disjoint() {
    for count in [1usize, 2, 5, 20] {
        let dir = tempfile::tempdir().unwrap();
        let (agent, _) = common::agent(dir.path()).await;
        let sessions = agent.sessions().clone();

        let handles: Vec<_> = (0..count)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move { sessions.create_session().await.unwrap() })
            })
            .collect();
        let mut ids = Vec::with_capacity(count);
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), count);

        let mut dirs = Vec::with_capacity(count);
        for id in &ids {
            dirs.push(sessions.get_session_directory(id).await.unwrap());
        }
        for (i, a) in dirs.iter().enumerate() {
            assert!(a.is_dir());
            for (j, b) in dirs.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b), "{} nested in {}", a.display(), b.display());
                }
            }
        }
        assert_eq!(sessions.get_active_sessions().await.len(), count);
    }
}

#[tokio::test]
async fn test_files_stay_in_their_session() {
    let dir = tempfile::tempdir().unwrap();
    let (agent, _) = common::agent(dir.path()).await;
    let sessions = agent.sessions();

    let a = sessions.create_session().await.unwrap();
    let b = sessions.create_session().await.unwrap();
    let file = sessions
        .add_file(&a, "tax-return.pdf", "application/pdf", b"%PDF-1.4 a")
        .await
        .unwrap();

    let a_files = sessions.get_session_files_directory(&a).await.unwrap();
    assert!(file.local_path.starts_with(&a_files));
    assert!(!file.local_path.to_string_lossy().contains("tax-return"));

    let b_session = sessions.get_session_status(&b).await.unwrap();
    assert!(b_session.files.is_empty());

    assert!(sessions.terminate_session(&a).await.unwrap());
    assert!(!a_files.exists());
    assert_eq!(
        sessions.get_session_status(&b).await.unwrap().status,
        SessionStatus::Active
    );
}
