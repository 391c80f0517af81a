//! Bundle Service two-phase commit scenarios (mirrors the teacher's
//! `tests/transactions/*` layout: basic commits, and rollback on failure).

mod common;

use carestore::bundle::{BatchRequest, BundleMode, Operation};
use common::test_env;
use serde_json::json;

fn create(id: &str) -> BatchRequest {
    BatchRequest {
        operation: Operation::Create,
        resource_type: "Patient".to_string(),
        id: Some(id.to_string()),
        resource: Some(json!({"name": id})),
        tenant_id: None,
        full_url: None,
    }
}

#[tokio::test]
async fn bundle_create_update_delete_all_commit_together() {
    let env = test_env();
    env.store
        .create_resource("Patient", Some("b1"), json!({}), None)
        .await
        .unwrap();
    env.store
        .create_resource("Patient", Some("c1"), json!({}), None)
        .await
        .unwrap();

    let entries = vec![
        create("a1"),
        BatchRequest {
            operation: Operation::Update,
            resource_type: "Patient".to_string(),
            id: Some("b1".to_string()),
            resource: Some(json!({"name": "updated"})),
            tenant_id: None,
            full_url: None,
        },
        BatchRequest {
            operation: Operation::Delete,
            resource_type: "Patient".to_string(),
            id: Some("c1".to_string()),
            resource: None,
            tenant_id: None,
            full_url: None,
        },
    ];
    let responses = env
        .store
        .run_bundle(entries, BundleMode::Transaction)
        .await
        .unwrap();
    assert_eq!(responses.len(), 3);

    assert!(env.store.read_most_recent("Patient", "a1", None).await.is_ok());
    assert_eq!(
        env.store.read_most_recent("Patient", "b1", None).await.unwrap()["name"],
        "updated"
    );
    assert!(env.store.read_most_recent("Patient", "c1", None).await.is_err());
}

#[tokio::test]
async fn bundle_rolls_back_created_entries_when_delete_target_is_missing() {
    let env = test_env();

    // A and B would be fresh creates; C's delete target does not exist, so
    // Phase 0 pre-resolution fails the whole bundle before anything stages
    // — A and B must never become visible (scenario 6).
    let entries = vec![
        create("a1"),
        create("b1"),
        BatchRequest {
            operation: Operation::Delete,
            resource_type: "Patient".to_string(),
            id: Some("c1".to_string()),
            resource: None,
            tenant_id: None,
            full_url: None,
        },
    ];

    let result = env.store.run_bundle(entries, BundleMode::Transaction).await;
    assert!(result.is_err());

    assert!(env.store.read_most_recent("Patient", "a1", None).await.is_err());
    assert!(env.store.read_most_recent("Patient", "b1", None).await.is_err());
}

#[tokio::test]
async fn single_entry_read_bundle_returns_current_resource() {
    let env = test_env();
    env.store
        .create_resource("Patient", Some("p1"), json!({"name": "x"}), None)
        .await
        .unwrap();

    let entries = vec![BatchRequest {
        operation: Operation::Read,
        resource_type: "Patient".to_string(),
        id: Some("p1".to_string()),
        resource: None,
        tenant_id: None,
        full_url: None,
    }];
    let responses = env
        .store
        .run_bundle(entries, BundleMode::Transaction)
        .await
        .unwrap();
    assert_eq!(responses[0].resource.as_ref().unwrap()["name"], "x");
}

#[tokio::test]
async fn read_bundle_entry_for_missing_resource_fails_whole_bundle() {
    let env = test_env();
    let entries = vec![BatchRequest {
        operation: Operation::Read,
        resource_type: "Patient".to_string(),
        id: Some("missing".to_string()),
        resource: None,
        tenant_id: None,
        full_url: None,
    }];
    let result = env.store.run_bundle(entries, BundleMode::Transaction).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn batch_mode_resolves_urn_uuid_cross_entry_references() {
    let env = test_env();

    let patient = BatchRequest {
        operation: Operation::Create,
        resource_type: "Patient".to_string(),
        id: None,
        resource: Some(json!({"name": "referenced patient"})),
        tenant_id: None,
        full_url: Some("urn:uuid:aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa".to_string()),
    };

    let observation = BatchRequest {
        operation: Operation::Create,
        resource_type: "Observation".to_string(),
        id: Some("obs1".to_string()),
        resource: Some(json!({
            "subject": {"reference": "urn:uuid:aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa"}
        })),
        tenant_id: None,
        full_url: None,
    };

    let responses = env
        .store
        .run_bundle(vec![patient, observation], BundleMode::Batch)
        .await
        .unwrap();

    let resolved = responses[1].resource.as_ref().unwrap()["subject"]["reference"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(resolved.starts_with("Patient/"));
}

#[tokio::test]
async fn batch_mode_entry_failure_does_not_roll_back_prior_entries() {
    let env = test_env();

    let entries = vec![
        create("ok1"),
        BatchRequest {
            operation: Operation::Delete,
            resource_type: "Patient".to_string(),
            id: Some("does-not-exist".to_string()),
            resource: None,
            tenant_id: None,
            full_url: None,
        },
    ];

    let result = env.store.run_bundle(entries, BundleMode::Batch).await;
    assert!(result.is_err());

    // Batch mode has no cross-entry rollback: the first entry already
    // committed independently before the second failed.
    assert!(env.store.read_most_recent("Patient", "ok1", None).await.is_ok());
}
