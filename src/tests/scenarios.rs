use super::{face, fields, memory_service, DIMENSIONS};
use crate::errors::ErrorKind;
use crate::report::{ReportId, ReportStatus};

#[test]
fn test_exact_search_returns_the_report() {
    let service = memory_service();
    let a = service
        .create_report(fields("Alice"), face(0), "desk")
        .unwrap();
    service.create_report(fields("Bob"), face(1), "desk").unwrap();

    let matches = service.search(&face(0), Some(0.0), 1).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].report.report_id, a.report_id);
    assert_eq!(matches[0].similarity, 1.0);
    assert_eq!(matches[0].rank, 1);
}

#[test]
fn test_archived_twin_is_not_matched() {
    let service = memory_service();
    let a = service
        .create_report(fields("Active"), vec![0.5, 0.5, 0.0, 0.0], "desk")
        .unwrap();
    let b = service
        .create_report(fields("Archived"), vec![0.5, 0.5, 0.0, 0.001], "desk")
        .unwrap();
    service
        .update_status(&b.report_id, ReportStatus::Archived)
        .unwrap();

    let matches = service
        .search(&[0.5, 0.5, 0.0, 0.0005], Some(0.0), 10)
        .unwrap();
    let ids: Vec<_> = matches.iter().map(|m| m.report.report_id.clone()).collect();
    assert_eq!(ids, vec![a.report_id]);
}

#[test]
fn test_resolved_reports_leave_search_but_stay_listed() {
    let service = memory_service();
    let a = service
        .create_report(fields("Found"), face(2), "desk")
        .unwrap();
    service
        .update_status(&a.report_id, ReportStatus::Resolved)
        .unwrap();

    assert!(service.search(&face(2), Some(0.0), 5).unwrap().is_empty());

    let resolved = service
        .list_reports(Some(ReportStatus::Resolved), 0, 10)
        .unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].report_id, a.report_id);
    assert!(service
        .list_reports(Some(ReportStatus::Active), 0, 10)
        .unwrap()
        .is_empty());
}

#[test]
fn test_transitions() {
    let service = memory_service();
    let a = service.create_report(fields("A"), face(0), "desk").unwrap();

    service
        .update_status(&a.report_id, ReportStatus::Resolved)
        .unwrap();

    let err = service
        .update_status(&a.report_id, ReportStatus::Active)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let err = service
        .update_status(&a.report_id, ReportStatus::Resolved)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let archived = service
        .update_status(&a.report_id, ReportStatus::Archived)
        .unwrap();
    assert_eq!(archived.status, ReportStatus::Archived);

    let err = service
        .update_status(&ReportId::from("does-not-exist"), ReportStatus::Resolved)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_out_of_range_thresholds_are_rejected() {
    let service = memory_service();
    service.create_report(fields("A"), face(0), "desk").unwrap();

    for threshold in [1.1, -0.1] {
        let err = service.search(&face(0), Some(threshold), 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

#[test]
fn test_wrong_dimension_create_changes_nothing() {
    let service = memory_service();
    let err = service
        .create_report(fields("A"), vec![1.0; DIMENSIONS + 1], "desk")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stats = service.stats().unwrap();
    assert_eq!(stats.reports, 0);
    assert_eq!(stats.store_size, 0);
}

#[test]
fn test_listing_is_newest_first() {
    let service = memory_service();
    let ids: Vec<_> = (0..5)
        .map(|i| {
            service
                .create_report(fields(&format!("P{i}")), face(i), "desk")
                .unwrap()
                .report_id
        })
        .collect();

    let page = service.list_reports(None, 0, 3).unwrap();
    let listed: Vec<_> = page.iter().map(|r| r.report_id.clone()).collect();
    assert_eq!(listed, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
    assert!(page.windows(2).all(|w| w[0].created_at > w[1].created_at));

    let rest = service.list_reports(None, 3, 10).unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1].report_id, ids[0]);
}

#[test]
fn test_get_report_keeps_embedding_and_author() {
    let service = memory_service();
    let created = service
        .create_report(fields("A"), face(3), "field-team")
        .unwrap();

    let fetched = service.get_report(&created.report_id).unwrap();
    assert_eq!(fetched.embedding, face(3));
    assert_eq!(fetched.created_by, "field-team");
    assert_eq!(fetched.status, ReportStatus::Active);
}
