use filevault_core::path::{join_logical, normalize_logical};
use filevault_core::{
    Actor, ConflictPolicy, ErrorKind, JobData, JobOperation, JobStatus, PathValidator,
    TrashRecord, VaultConfig, VaultError,
};

#[test]
fn test_validator_confines_every_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let validator = PathValidator::new(dir.path()).unwrap();

    for raw in ["/", "docs", "/docs/a.txt", "a\\b\\c", "//x//y/"] {
        let resolved = validator.resolve(raw).unwrap();
        assert!(resolved.starts_with(validator.root()), "{raw} escaped");
    }

    for raw in ["..", "/..", "/a/../../etc/passwd", "a\\..\\..\\b"] {
        let err = validator.resolve(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathTraversal, "{raw} accepted");
    }
}

#[test]
fn test_resolved_paths_map_back_to_logical() {
    let dir = tempfile::tempdir().unwrap();
    let validator = PathValidator::new(dir.path()).unwrap();

    let logical = join_logical("/reports/2024", "q1.csv");
    let resolved = validator.resolve(&logical).unwrap();
    assert_eq!(validator.to_logical(&resolved).unwrap(), logical);
    assert_eq!(normalize_logical(&logical), logical);
}

#[test]
fn test_config_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filevault.toml");
    std::fs::write(
        &path,
        "storage_root = \"/srv/data\"\nstate_dir = \"/var/lib/filevault\"\n",
    )
    .unwrap();

    let config = VaultConfig::load(&path).unwrap();
    assert_eq!(config.trash_dir(), std::path::PathBuf::from("/var/lib/filevault/trash"));
    assert_eq!(
        config.jobs_dir(),
        std::path::PathBuf::from("/var/lib/filevault/jobs")
    );

    let err = VaultConfig::load(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, VaultError::NotFound { .. }));
}

#[test]
fn test_trash_record_round_trip() {
    let record = TrashRecord {
        id: uuid::Uuid::new_v4(),
        original_path: "/docs/a.txt".into(),
        trash_name: "x_a.txt".into(),
        deleted_at: chrono::Utc::now(),
        deleted_by: Actor::new("u1", "alice", "admin", "127.0.0.1"),
        restored_at: None,
        restored_by: None,
    };

    let json = serde_json::to_string(&record).unwrap();
    assert!(!json.contains("restored_at"));
    let back: TrashRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
    assert!(!back.is_restored());
}

#[test]
fn test_new_job_is_queued() {
    let policy = ConflictPolicy::parse("rename").unwrap();
    let job = JobData::queued(JobOperation::Move, Some(policy), 3);

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.total_items, 3);
    assert_eq!(job.progress, 0);
    assert!(job.started_at.is_none());
    assert!(Actor::system().is_system());
}
