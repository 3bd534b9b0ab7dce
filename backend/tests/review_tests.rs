mod support;

use backend::booklet::plan_booklet;
use backend::db::{page_codes, responses, scan_uploads};
use backend::error::PipelineError;
use backend::reconcile::review;
use common::model::identifier::PageKey;
use common::model::scan::{ConflictResolution, DecodeStatus, ScanStatus};
use common::requests::ManualTarget;
use support::{seed_journey, streaked_page, typed_response, Fixture, PageEcho};
use std::sync::Barrier;
use uuid::Uuid;

#[test]
fn printed_short_code_resolves_an_unreadable_page() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1], 1);
    let conn = fx.db.open().unwrap();
    plan_booklet(&conn, seeded.journey_id).unwrap();
    let set = fx.image_set("smeared", &[seeded.stamp(0, 1), streaked_page()]);
    let upload = fx.upload(&set, None);
    let extractor = PageEcho::default();
    fx.ingest(upload.id, &extractor).unwrap();

    let storage = &fx.config.storage;
    let unknown = ManualTarget::ShortCode {
        code: "22222-22222".into(),
    };
    assert!(matches!(
        review::resolve_page(&fx.db, storage, &extractor, upload.id, 2, &unknown),
        Err(PipelineError::NotFound(_))
    ));
    let garbage = ManualTarget::ShortCode { code: "hello".into() };
    assert!(matches!(
        review::resolve_page(&fx.db, storage, &extractor, upload.id, 2, &garbage),
        Err(PipelineError::BadRequest(_))
    ));

    let printed = page_codes::find_by_key(
        &conn,
        &PageKey {
            journey_id: seeded.journey_id,
            user_id: seeded.users[0].0,
            page_number: 2,
        },
    )
    .unwrap()
    .unwrap();
    // Typed by an operator: lower case, a space instead of the dash.
    let typed = ManualTarget::ShortCode {
        code: printed.code.to_lowercase().replace('-', " "),
    };
    let resolved = review::resolve_page(&fx.db, storage, &extractor, upload.id, 2, &typed).unwrap();

    let report = resolved.import_report.unwrap();
    let page = report.page(2).unwrap();
    assert_eq!(page.decode_status, DecodeStatus::Manual);
    assert_eq!(page.question_id, Some(seeded.questions[1]));
    assert!(page.attributed);
    assert_eq!(report.summary.unresolved, 0);
    assert_eq!(report.summary.attributed, 2);
    assert_eq!(resolved.extracted_responses.unwrap().len(), 2);
    let answer = responses::find(&conn, seeded.users[0].1, seeded.questions[1])
        .unwrap()
        .unwrap();
    assert_eq!(answer.answer_text, "handwritten answer");

    assert!(matches!(
        review::resolve_page(&fx.db, storage, &extractor, upload.id, 2, &typed),
        Err(PipelineError::InvalidState(_))
    ));
}

#[test]
fn concurrent_page_assignments_both_land() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1, 1], 1);
    let set = fx.image_set(
        "two-reviewers",
        &[seeded.stamp(0, 1), streaked_page(), streaked_page()],
    );
    let upload = fx.upload(&set, None);
    let extractor = PageEcho::default();
    fx.ingest(upload.id, &extractor).unwrap();

    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        for page_index in [2u32, 3] {
            let (fx, extractor, barrier) = (&fx, &extractor, &barrier);
            let target = ManualTarget::Direct {
                journey_id: seeded.journey_id,
                user_id: seeded.users[0].0,
                page_number: page_index as u16,
            };
            scope.spawn(move || {
                barrier.wait();
                let storage = &fx.config.storage;
                review::resolve_page(&fx.db, storage, extractor, upload.id, page_index, &target)
                    .unwrap();
            });
        }
    });

    let conn = fx.db.open().unwrap();
    let report = scan_uploads::get(&conn, upload.id)
        .unwrap()
        .import_report
        .unwrap();
    assert_eq!(report.page(2).unwrap().decode_status, DecodeStatus::Manual);
    assert_eq!(report.page(3).unwrap().decode_status, DecodeStatus::Manual);
    assert_eq!(report.summary.unresolved, 0);
    assert_eq!(report.summary.attributed, 3);
}

#[test]
fn manual_identity_cannot_copy_a_decoded_page() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1], 1);
    let set = fx.image_set("copy", &[seeded.stamp(0, 1), streaked_page()]);
    let upload = fx.upload(&set, None);
    let extractor = PageEcho::default();
    fx.ingest(upload.id, &extractor).unwrap();

    let target = ManualTarget::Direct {
        journey_id: seeded.journey_id,
        user_id: seeded.users[0].0,
        page_number: 1,
    };
    let err = review::resolve_page(&fx.db, &fx.config.storage, &extractor, upload.id, 2, &target)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState(_)));
}

#[test]
fn reviewer_can_replace_a_typed_answer() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let participation = seeded.users[0].1;
    typed_response(&fx.db, participation, seeded.questions[0], "draft");
    let set = fx.image_set("replace", &[seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, Some(participation));
    let extractor = PageEcho::default();
    fx.ingest(upload.id, &extractor).unwrap();

    let settled = review::resolve_conflict(
        &fx.db,
        &fx.config.storage,
        &extractor,
        upload.id,
        1,
        ConflictResolution::ReplaceExisting,
    )
    .unwrap();

    let report = settled.import_report.unwrap();
    let page = report.page(1).unwrap();
    assert_eq!(page.resolution, Some(ConflictResolution::ReplaceExisting));
    assert!(page.attributed);
    assert_eq!(report.pending_attention(), 0);
    let stored = responses::find(&fx.db.open().unwrap(), participation, seeded.questions[0])
        .unwrap()
        .unwrap();
    assert_eq!(stored.answer_text, "answer on page 1");
    assert!(stored.ocr_source);
    assert_eq!(stored.scan_upload_id, Some(upload.id));

    assert!(matches!(
        review::resolve_conflict(
            &fx.db,
            &fx.config.storage,
            &extractor,
            upload.id,
            1,
            ConflictResolution::KeepExisting,
        ),
        Err(PipelineError::InvalidState(_))
    ));
}

#[test]
fn keeping_the_existing_answer_only_records_the_decision() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let participation = seeded.users[0].1;
    typed_response(&fx.db, participation, seeded.questions[0], "draft");
    let set = fx.image_set("keep", &[seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, None);
    let extractor = PageEcho::default();
    fx.ingest(upload.id, &extractor).unwrap();
    let calls_after_ingest = extractor.calls.load(std::sync::atomic::Ordering::Relaxed);

    let settled = review::resolve_conflict(
        &fx.db,
        &fx.config.storage,
        &extractor,
        upload.id,
        1,
        ConflictResolution::KeepExisting,
    )
    .unwrap();

    let page = settled.import_report.as_ref().unwrap().page(1).unwrap().clone();
    assert_eq!(page.resolution, Some(ConflictResolution::KeepExisting));
    assert!(!page.attributed);
    assert_eq!(
        extractor.calls.load(std::sync::atomic::Ordering::Relaxed),
        calls_after_ingest
    );
    let stored = responses::find(&fx.db.open().unwrap(), participation, seeded.questions[0])
        .unwrap()
        .unwrap();
    assert_eq!(stored.answer_text, "draft");
}

#[test]
fn only_processed_uploads_can_be_signed_off() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let set = fx.image_set("gate", &[seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, None);
    let reviewer = Uuid::new_v4();

    assert!(matches!(
        review::mark_reviewed(&fx.db, upload.id, reviewer),
        Err(PipelineError::InvalidState(_))
    ));

    fx.ingest(upload.id, &PageEcho::default()).unwrap();
    let reviewed = review::mark_reviewed(&fx.db, upload.id, reviewer).unwrap();
    assert_eq!(reviewed.status, ScanStatus::Reviewed);
    assert_eq!(reviewed.reviewed_by, Some(reviewer));
    assert!(reviewed.reviewed_at.is_some());

    assert!(matches!(
        review::mark_reviewed(&fx.db, upload.id, reviewer),
        Err(PipelineError::InvalidState(_))
    ));
    let target = ManualTarget::Direct {
        journey_id: seeded.journey_id,
        user_id: seeded.users[0].0,
        page_number: 1,
    };
    assert!(matches!(
        review::resolve_page(&fx.db, &fx.config.storage, &PageEcho::default(), upload.id, 1, &target),
        Err(PipelineError::InvalidState(_))
    ));
}
