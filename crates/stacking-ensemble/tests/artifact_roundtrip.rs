mod common;

use common::{fast_config, synthetic_table};
use ensemble_core::EnsembleError;
use stacking_ensemble::{ArtifactRegistry, ArtifactStore, EnsembleTrainer, ModelArtifact};

fn scoring_batch() -> Vec<Vec<f64>> {
    (0..50)
        .map(|i| vec![i as f64 / 50.0, ((i * 13) % 50) as f64 / 50.0, 0.1 + 0.001 * i as f64])
        .collect()
}

#[test]
fn test_serialized_artifact_predicts_identically() {
    let table = synthetic_table(600);
    let artifact = EnsembleTrainer::new(fast_config()).unwrap().train(&table, 1).unwrap();

    let bytes = artifact.to_json().unwrap();
    let restored = ModelArtifact::from_json(&bytes).unwrap();
    assert_eq!(restored, artifact);

    let before = artifact.predict_proba(&scoring_batch()).unwrap();
    let after = restored.predict_proba(&scoring_batch()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_predict_rejects_wrong_width() {
    let table = synthetic_table(400);
    let artifact = EnsembleTrainer::new(fast_config()).unwrap().train(&table, 1).unwrap();
    let err = artifact.predict_proba(&[vec![0.5, 0.5]]).unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidData(_)));
}

#[test]
fn test_store_is_append_only_and_verifies_checksums() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let table = synthetic_table(400);
    let trainer = EnsembleTrainer::new(fast_config()).unwrap();

    assert_eq!(store.next_version("SPY", 5).unwrap(), 1);
    let artifact = trainer.train(&table, 1).unwrap();
    let record = store.publish(&artifact).unwrap();
    assert_eq!(record.name, "SPY/h5_ensemble_v1");
    assert!(dir.path().join("SPY/h5_ensemble_v1.json").exists());
    assert!(dir.path().join("SPY/h5_ensemble_v1.meta.json").exists());
    assert_eq!(store.next_version("SPY", 5).unwrap(), 2);

    // republishing the same version must not overwrite it
    assert!(matches!(store.publish(&artifact), Err(EnsembleError::Storage(_))));

    let loaded = store.load(artifact.id()).unwrap();
    assert_eq!(
        loaded.predict_proba(&scoring_batch()).unwrap(),
        artifact.predict_proba(&scoring_batch()).unwrap()
    );
    assert_eq!(store.load_record(artifact.id()).unwrap().gating, *artifact.gating_table());

    // tamper with the artifact bytes
    let path = store.artifact_path(artifact.id());
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.push(b' ');
    std::fs::write(&path, bytes).unwrap();
    assert!(matches!(
        store.load(artifact.id()),
        Err(EnsembleError::IntegrityMismatch { .. })
    ));
}

#[test]
fn test_failed_publish_leaves_no_version_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let table = synthetic_table(400);
    let artifact = EnsembleTrainer::new(fast_config()).unwrap().train(&table, 1).unwrap();

    // a stray sidecar already occupies the version's metadata path
    let sidecar = store.metadata_path(artifact.id());
    std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
    std::fs::write(&sidecar, b"stale").unwrap();

    assert!(matches!(store.publish(&artifact), Err(EnsembleError::Storage(_))));
    assert!(!store.artifact_path(artifact.id()).exists());
    assert_eq!(std::fs::read(&sidecar).unwrap(), b"stale");
    assert_eq!(store.next_version("SPY", 5).unwrap(), 1);
    let leftovers: Vec<_> = std::fs::read_dir(sidecar.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);

    std::fs::remove_file(&sidecar).unwrap();
    store.publish(&artifact).unwrap();
    assert_eq!(store.next_version("SPY", 5).unwrap(), 2);
    assert!(store.load(artifact.id()).is_ok());
}

#[test]
fn test_decoding_rejects_inconsistent_artifacts() {
    let table = synthetic_table(400);
    let artifact = EnsembleTrainer::new(fast_config()).unwrap().train(&table, 1).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&artifact.to_json().unwrap()).unwrap();

    let mut out_of_range = value.clone();
    out_of_range["regime_features"][0]["column"] = serde_json::json!(99);
    let err = ModelArtifact::from_json(&serde_json::to_vec(&out_of_range).unwrap()).unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidData(_)));

    let mut missing_regime = value.clone();
    missing_regime["regime_features"] = serde_json::json!([]);
    let err = ModelArtifact::from_json(&serde_json::to_vec(&missing_regime).unwrap()).unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidData(_)));

    let mut extra_feature = value;
    extra_feature["feature_names"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!("extra"));
    let err = ModelArtifact::from_json(&serde_json::to_vec(&extra_feature).unwrap()).unwrap_err();
    assert!(matches!(err, EnsembleError::InvalidData(_)));
}

#[tokio::test]
async fn test_registry_tracks_published_versions() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let registry = ArtifactRegistry::connect("sqlite::memory:").await.unwrap();
    let table = synthetic_table(400);
    let trainer = EnsembleTrainer::new(fast_config()).unwrap();

    assert_eq!(registry.latest_version("SPY", 5).await.unwrap(), None);
    for _ in 0..2 {
        let version = store.next_version("SPY", 5).unwrap();
        let record = store.publish(&trainer.train(&table, version).unwrap()).unwrap();
        registry.record(&record).await.unwrap();
    }

    assert_eq!(registry.latest_version("SPY", 5).await.unwrap(), Some(2));
    let history = registry.history("SPY", 5).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);
    assert_eq!(history[1].name, "SPY/h5_ensemble_v1");
    assert_eq!(history[0].seed, 42);

    // a version is recorded once
    let record = store.load_record(&stacking_ensemble::ArtifactId::new("SPY", 5, 1)).unwrap();
    assert!(registry.record(&record).await.is_err());
}
