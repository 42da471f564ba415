use std::sync::Arc;
use std::time::Duration;

use mgf_core::cache::{CacheManager, Flow, LocalBackend};
use mgf_core::document::adapter::MockAdapter;
use mgf_core::document::{DocumentManager, DocumentManagerConfig, LockType};
use mgf_core::fingerprint::{self, EngineFingerprint};

fn ensure_fingerprint() {
    let _ = fingerprint::init(EngineFingerprint::new(
        "1.0.0",
        "occt-7.7",
        "py3.11",
        "v1",
        "deadbeef",
        vec!["partdesign".to_string()],
        vec![],
    ));
}

#[tokio::test]
async fn cache_manager_survives_a_compute_failure_without_poisoning_the_key() {
    ensure_fingerprint();
    let cache = CacheManager::new(64, 1_000_000, Arc::new(LocalBackend::new()));

    let err = cache
        .get_or_compute(Flow::Geometry, b"{\"radius\":10}", "mesh", Duration::from_secs(60), || async {
            Err::<Vec<u8>, _>("kernel crashed")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, mgf_core::cache::ComputeOutcome::Compute(_)));

    // A later call with the same key succeeds normally; the failed attempt left no trace.
    let value = cache
        .get_or_compute(Flow::Geometry, b"{\"radius\":10}", "mesh", Duration::from_secs(60), || async {
            Ok::<Vec<u8>, String>(b"brep-bytes".to_vec())
        })
        .await
        .unwrap();
    assert_eq!(value, b"brep-bytes".to_vec());
}

#[tokio::test]
async fn document_lifecycle_round_trips_through_open_lock_save_close() {
    let documents = DocumentManager::new(Arc::new(MockAdapter::new()), DocumentManagerConfig::default());

    let doc = documents.create_document("job-one", None, None, None).unwrap();
    let lock = documents
        .acquire_lock(&doc.id, "tenant-a", LockType::Exclusive, None)
        .await
        .unwrap();

    let saved = documents
        .save_document(&doc.id, "tenant-a", "out.fcstd", false, true)
        .await
        .unwrap();
    assert_eq!(saved.version, doc.version);
    assert!(saved.sha256.is_some());

    let status = documents.get_document_status(&doc.id).unwrap();
    assert_eq!(status.backup_count, 1);

    documents.release_lock(&doc.id, &lock.lock_id).unwrap();
    documents
        .acquire_lock(&doc.id, "tenant-a", LockType::Exclusive, None)
        .await
        .unwrap();
    documents.close_document(&doc.id, "tenant-a", false, false).await.unwrap();
}
