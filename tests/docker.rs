//! End-to-end scenarios against a real Docker daemon and MySQL image.
//!
//! Ignored by default; run with `cargo test --test docker -- --ignored`.
//! Each test provisions under its own owner id and purges it afterwards.

use serde_json::json;
use sqlbox::{Config, Difficulty, SandboxManager, SandboxStatus};

fn manager() -> SandboxManager {
    let mut config = Config::default();
    // MySQL 8 initialization can take a while on a cold image
    config.probe.max_attempts = 90;
    SandboxManager::from_config(&config).expect("failed to build manager")
}

fn owner(test: &str) -> String {
    format!("it-{}-{}", test, std::process::id())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_easy_round_trip_and_grading() {
    let manager = manager();
    let owner = owner("easy");

    let instance = manager
        .provision(&owner, "alice", Difficulty::Easy)
        .await
        .unwrap();
    assert_eq!(instance.status, SandboxStatus::Ready);
    assert_eq!(instance.database_name, "db_alice");

    let count = manager
        .execute(&instance.id, "SELECT COUNT(*) AS n FROM users", None, None)
        .await
        .unwrap();
    assert_eq!(count.rows.len(), 1);
    assert_eq!(count.rows[0]["n"], json!(3));

    let graded = manager
        .execute(
            &instance.id,
            "SELECT id, name, email FROM users",
            Some(1),
            Some(Difficulty::Easy),
        )
        .await
        .unwrap();
    assert_eq!(graded.is_correct, Some(true));

    let partial = manager
        .execute(
            &instance.id,
            "SELECT id, name FROM users",
            Some(1),
            Some(Difficulty::Easy),
        )
        .await
        .unwrap();
    assert_eq!(partial.is_correct, Some(false));

    let write = manager
        .execute(&instance.id, "UPDATE users SET age = age + 1", None, None)
        .await
        .unwrap();
    assert!(write.rows.is_empty());
    assert_eq!(write.affected_rows, 3);

    let err = manager
        .execute(&instance.id, "SELEC 1", None, None)
        .await
        .unwrap_err();
    assert!(err.is_query());

    manager.purge_owner(&owner).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_reset_to_medium_in_place() {
    let manager = manager();
    let owner = owner("reset");

    let instance = manager
        .provision(&owner, "bob", Difficulty::Easy)
        .await
        .unwrap();
    let reset = manager
        .reset(&instance.id, Some(Difficulty::Medium))
        .await
        .unwrap();
    assert_eq!(reset.id, instance.id);
    assert_eq!(reset.endpoint, instance.endpoint);

    for (table, expected) in [("users", 5), ("products", 5), ("orders", 6), ("order_items", 9)] {
        let result = manager
            .execute(
                &instance.id,
                &format!("SELECT COUNT(*) AS n FROM {table}"),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.rows[0]["n"], json!(expected), "{table}");
    }

    manager.purge_owner(&owner).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_one_instance_per_owner_and_idempotent_destroy() {
    let manager = manager();
    let owner = owner("single");

    manager
        .provision(&owner, "7-leet", Difficulty::Easy)
        .await
        .unwrap();
    let second = manager
        .provision(&owner, "7-leet", Difficulty::Easy)
        .await
        .unwrap();
    assert_eq!(second.database_name, "db_user_7_leet");

    let current = manager.get_current(&owner).await.unwrap().unwrap();
    assert_eq!(current.id, second.id);
    assert_eq!(manager.orchestrator().list(&owner).await.unwrap().len(), 1);

    manager.destroy(&second.id).await.unwrap();
    manager.destroy(&second.id).await.unwrap();
    assert!(manager.get_current(&owner).await.unwrap().is_none());
}
