use std::fs::OpenOptions;

use super::{face, fields, matching_config, open_service};
use crate::consistency::Bindings;
use crate::errors::ErrorKind;
use crate::index::EmbeddingStore;
use crate::report::{ReportId, ReportStatus};
use crate::service::MatchService;

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let (a, b) = {
        let service = open_service(dir.path());
        let a = service.create_report(fields("A"), face(0), "desk").unwrap();
        let b = service.create_report(fields("B"), face(1), "desk").unwrap();
        service
            .update_status(&b.report_id, ReportStatus::Archived)
            .unwrap();
        (a, b)
    };

    let service = open_service(dir.path());
    assert!(service.reconcile_report().is_clean());
    assert_eq!(
        service.get_report(&b.report_id).unwrap().status,
        ReportStatus::Archived
    );

    let matches = service.search(&face(0), Some(0.0), 5).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].report.report_id, a.report_id);
}

#[test]
fn test_state_survives_checkpoint_and_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let ids: Vec<ReportId> = {
        let service = open_service(dir.path());
        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                service
                    .create_report(fields(&format!("P{i}")), face(i), "desk")
                    .unwrap()
                    .report_id,
            );
        }
        service.checkpoint().unwrap();
        ids.push(
            service
                .create_report(fields("P3"), face(3), "desk")
                .unwrap()
                .report_id,
        );
        service.shutdown().unwrap();
        ids
    };

    let service = open_service(dir.path());
    assert!(service.reconcile_report().is_clean());
    assert_eq!(service.stats().unwrap().reports, 4);

    for (i, id) in ids.iter().enumerate() {
        let matches = service.search(&face(i), Some(0.9), 1).unwrap();
        assert_eq!(&matches[0].report.report_id, id);
    }
}

#[test]
fn test_binding_to_missing_report_is_tombstoned_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let config = matching_config();

    {
        let service = open_service(dir.path());
        for i in 0..5 {
            service
                .create_report(fields(&format!("P{i}")), face(i), "desk")
                .unwrap();
        }
    }

    // a vector at position 5 bound to a report that never made it to disk
    let ghost = vec![9.0, 9.0, 9.0, 9.0];
    {
        let store = EmbeddingStore::open(dir.path(), &config).unwrap();
        assert_eq!(store.insert(&ghost).unwrap(), 5);
        let bindings = Bindings::open(dir.path(), false).unwrap();
        bindings.bind(5, &ReportId::from("ghost")).unwrap();
    }

    {
        let service = open_service(dir.path());
        let report = service.reconcile_report();
        assert_eq!(report.tombstoned_missing_report, 1);
        assert_eq!(report.repairs(), 1);

        let stats = service.stats().unwrap();
        assert_eq!(stats.store_size, 6);
        assert_eq!(stats.live_vectors, 5);

        let matches = service.search(&ghost, Some(0.0), 10).unwrap();
        assert!(matches
            .iter()
            .all(|m| m.report.report_id != ReportId::from("ghost")));
    }

    let store = EmbeddingStore::open(dir.path(), &config).unwrap();
    assert!(store.is_tombstoned(5).unwrap());
}

#[test]
fn test_orphan_vector_from_interrupted_create_is_tombstoned() {
    let dir = tempfile::tempdir().unwrap();
    let config = matching_config();

    {
        let service = open_service(dir.path());
        service.create_report(fields("A"), face(0), "desk").unwrap();
    }
    {
        // crash after the vector was appended, before anything else
        let store = EmbeddingStore::open(dir.path(), &config).unwrap();
        store.insert(&face(1)).unwrap();
    }

    let service = open_service(dir.path());
    assert_eq!(service.reconcile_report().tombstoned_unbound, 1);
    assert!(service.search(&face(1), Some(0.9), 5).unwrap().is_empty());
}

#[test]
fn test_torn_log_tail_reindexes_the_report() {
    let dir = tempfile::tempdir().unwrap();

    let (a, b) = {
        let service = open_service(dir.path());
        let a = service.create_report(fields("A"), face(0), "desk").unwrap();
        let b = service.create_report(fields("B"), face(1), "desk").unwrap();
        (a, b)
    };

    // lose half of the last vector record
    let log_path = dir.path().join("vectors.log");
    let len = std::fs::metadata(&log_path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&log_path).unwrap();
    file.set_len(len - 6).unwrap();
    drop(file);

    let service = open_service(dir.path());
    let report = service.reconcile_report();
    assert_eq!(report.released_out_of_range, 1);
    assert_eq!(report.reindexed_reports, 1);

    for (embedding, id) in [(face(0), &a.report_id), (face(1), &b.report_id)] {
        let matches = service.search(&embedding, Some(0.9), 1).unwrap();
        assert_eq!(&matches[0].report.report_id, id);
    }
}

#[test]
fn test_corrupt_snapshot_halts_startup() {
    let dir = tempfile::tempdir().unwrap();

    {
        let service = open_service(dir.path());
        service.create_report(fields("A"), face(0), "desk").unwrap();
        service.checkpoint().unwrap();
    }

    let snap_path = dir.path().join("vectors.snap");
    let mut bytes = std::fs::read(&snap_path).unwrap();
    let idx = bytes.len() - 8;
    bytes[idx] ^= 0xFF;
    std::fs::write(&snap_path, bytes).unwrap();

    let err = MatchService::open(&matching_config(), dir.path())
        .err()
        .expect("corrupt snapshot must fail startup");
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[test]
fn test_model_change_is_refused() {
    let dir = tempfile::tempdir().unwrap();

    {
        let service = open_service(dir.path());
        service.create_report(fields("A"), face(0), "desk").unwrap();
        service.checkpoint().unwrap();
    }

    let config = crate::config::MatchingConfig {
        model: "ArcFace".to_string(),
        ..matching_config()
    };
    let err = MatchService::open(&config, dir.path())
        .err()
        .expect("a snapshot from another model must be rejected");
    assert_eq!(err.kind(), ErrorKind::Storage);
}
