mod support;

use backend::db::{responses, scan_uploads};
use backend::error::PipelineError;
use backend::reconcile::review;
use backend::scan::{page_image_path, pages_dir};
use backend::symbol::stamp_page;
use common::model::scan::{DecodeStatus, ScanStatus};
use chrono::Utc;
use rusqlite::params;
use tiff::encoder::{colortype, TiffEncoder};
use support::{rotate, scramble_symbol, seed_journey, typed_response, Failing, Fixture, PageEcho};

#[test]
fn batch_upload_attributes_every_readable_page() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1, 1, 1, 1], 2);
    let mut pages: Vec<_> = (0..2)
        .flat_map(|user| (1..=5).map(move |page| (user, page)))
        .map(|(user, page)| seeded.stamp(user, page))
        .collect();
    scramble_symbol(&mut pages[4]);
    let set = fx.image_set("batch", &pages);
    let upload = fx.upload(&set, None);

    let done = fx.ingest(upload.id, &PageEcho::default()).unwrap();

    assert_eq!(done.status, ScanStatus::Processed);
    let report = done.import_report.unwrap();
    assert_eq!(report.summary.total_pages, 10);
    assert_eq!(report.summary.resolved, 9);
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(report.summary.attributed, 9);
    assert_eq!(report.summary.conflicts, 0);

    let unreadable = report.page(5).unwrap();
    assert_eq!(unreadable.decode_status, DecodeStatus::Unresolved);
    assert!(unreadable.error.is_some());
    assert!(page_image_path(&pages_dir(&fx.config.storage.upload_dir, upload.id), 5).is_file());

    assert_eq!(done.extracted_responses.unwrap().len(), 9);
    let conn = fx.db.open().unwrap();
    let second_user = responses::find(&conn, seeded.users[1].1, seeded.questions[2])
        .unwrap()
        .unwrap();
    assert_eq!(second_user.answer_text, "answer on page 3");
    assert!(second_user.ocr_source);
    assert_eq!(second_user.scan_upload_id, Some(upload.id));
    assert!(responses::find(&conn, seeded.users[0].1, seeded.questions[4])
        .unwrap()
        .is_none());
}

#[test]
fn tilted_photo_is_still_read() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let photo = rotate(&stamp_page(&seeded.payload(0, 1), 150).unwrap(), 15.0);
    let set = fx.image_set("photo", &[photo]);
    let upload = fx.upload(&set, Some(seeded.users[0].1));

    let report = fx
        .ingest(upload.id, &PageEcho::default())
        .unwrap()
        .import_report
        .unwrap();

    let page = report.page(1).unwrap();
    assert_eq!(page.decode_status, DecodeStatus::Decoded);
    assert_eq!(page.page_number, Some(1));
    assert!(page.attributed);
}

#[test]
fn pages_of_a_question_are_joined_in_booklet_order() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[2, 1], 1);
    let shuffled = [seeded.stamp(0, 3), seeded.stamp(0, 2), seeded.stamp(0, 1)];
    let set = fx.image_set("shuffled", &shuffled);
    let upload = fx.upload(&set, Some(seeded.users[0].1));

    let done = fx.ingest(upload.id, &PageEcho::default()).unwrap();

    let extracted = done.extracted_responses.unwrap();
    let first = extracted
        .iter()
        .find(|r| r.question_id == seeded.questions[0])
        .unwrap();
    assert_eq!(first.answer_text, "answer on page 1\n\nanswer on page 2");
    assert_eq!(first.pages, vec![3, 2]);
    let report = done.import_report.unwrap();
    assert_eq!(report.page(1).unwrap().question_id, Some(seeded.questions[1]));
}

#[test]
fn unreadable_file_moves_upload_to_error() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("scans.pdf");
    std::fs::write(&path, "these are not the pages you are looking for").unwrap();
    let upload = fx.upload(&path, None);

    let err = fx.ingest(upload.id, &PageEcho::default()).unwrap_err();
    assert!(matches!(err, PipelineError::Upload(_)));

    let stored = scan_uploads::get(&fx.db.open().unwrap(), upload.id).unwrap();
    assert_eq!(stored.status, ScanStatus::Error);
    assert!(stored.error_message.is_some());
    assert!(stored.import_report.is_none());
}

#[test]
fn typed_answer_is_never_overwritten() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1], 1);
    let participation = seeded.users[0].1;
    typed_response(&fx.db, participation, seeded.questions[0], "typed at the keyboard");
    let set = fx.image_set("typed", &[seeded.stamp(0, 1), seeded.stamp(0, 2)]);
    let upload = fx.upload(&set, Some(participation));

    let report = fx
        .ingest(upload.id, &PageEcho::default())
        .unwrap()
        .import_report
        .unwrap();

    let conflict = report.page(1).unwrap();
    assert_eq!(conflict.decode_status, DecodeStatus::Conflict);
    assert!(conflict.note.is_some());
    assert!(conflict.error.is_none());
    assert!(conflict.resolution.is_none());
    assert!(!conflict.attributed);
    assert!(report.page(2).unwrap().attributed);
    assert_eq!(report.summary.conflicts, 1);
    assert_eq!(report.summary.errors, 0);

    let kept = responses::find(&fx.db.open().unwrap(), participation, seeded.questions[0])
        .unwrap()
        .unwrap();
    assert_eq!(kept.answer_text, "typed at the keyboard");
    assert!(!kept.ocr_source);
}

#[test]
fn interrupted_ingest_can_be_rerun() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1], 1);
    let set = fx.image_set("rerun", &[seeded.stamp(0, 1), seeded.stamp(0, 2)]);
    let upload = fx.upload(&set, None);
    fx.ingest(upload.id, &PageEcho::default()).unwrap();

    // Worker died after writing responses but before the final status update.
    fx.db
        .open()
        .unwrap()
        .execute(
            "UPDATE scan_uploads SET status = 'processing', updated_at = ?1 WHERE id = ?2",
            params![Utc::now() - chrono::Duration::hours(1), upload.id.to_string()],
        )
        .unwrap();
    assert!(matches!(
        fx.ingest(upload.id, &PageEcho::default()),
        Err(PipelineError::AlreadyClaimed(_))
    ));
    review::release(&fx.db, upload.id, fx.config.scan.claim_lease()).unwrap();

    let again = fx.ingest(upload.id, &PageEcho::default()).unwrap();
    let report = again.import_report.unwrap();
    assert_eq!(report.summary.attributed, 2);
    assert_eq!(report.summary.conflicts, 0);
    let count: i64 = fx
        .db
        .open()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM question_responses", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn live_claim_cannot_be_released() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let set = fx.image_set("live", &[seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, None);
    scan_uploads::claim(&fx.db.open().unwrap(), upload.id).unwrap();

    let err = review::release(&fx.db, upload.id, fx.config.scan.claim_lease()).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState(_)));
    let conn = fx.db.open().unwrap();
    assert_eq!(scan_uploads::get(&conn, upload.id).unwrap().status, ScanStatus::Processing);

    // A zero lease treats any claim as abandoned.
    std::thread::sleep(std::time::Duration::from_millis(5));
    review::release(&fx.db, upload.id, std::time::Duration::ZERO).unwrap();
    assert_eq!(scan_uploads::get(&conn, upload.id).unwrap().status, ScanStatus::Uploaded);
}

#[test]
fn multi_page_tiff_ingests_every_frame() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1, 1, 1], 1);
    let path = fx.dir.path().join("batch.tiff");
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(std::io::BufWriter::new(file)).unwrap();
        for page in 1..=3 {
            let stamp = seeded.stamp(0, page);
            let (width, height) = stamp.dimensions();
            encoder
                .write_image::<colortype::Gray8>(width, height, stamp.as_raw())
                .unwrap();
        }
    }
    let upload = fx.upload(&path, None);

    let done = fx.ingest(upload.id, &PageEcho::default()).unwrap();

    let report = done.import_report.unwrap();
    assert_eq!(report.summary.total_pages, 3);
    assert_eq!(report.summary.resolved, 3);
    assert_eq!(report.summary.attributed, 3);
}

#[test]
fn claim_is_exclusive() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let set = fx.image_set("claimed", &[seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, None);
    let conn = fx.db.open().unwrap();

    scan_uploads::claim(&conn, upload.id).unwrap();
    assert!(matches!(
        scan_uploads::claim(&conn, upload.id),
        Err(PipelineError::AlreadyClaimed(_))
    ));
    scan_uploads::release_claim(&conn, upload.id).unwrap();
    assert!(matches!(
        scan_uploads::release_claim(&conn, upload.id),
        Err(PipelineError::InvalidState(_))
    ));
}

#[test]
fn page_scanned_twice_conflicts_on_the_later_copy() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 1);
    let set = fx.image_set("twice", &[seeded.stamp(0, 1), seeded.stamp(0, 1)]);
    let upload = fx.upload(&set, None);

    let done = fx.ingest(upload.id, &PageEcho::default()).unwrap();
    let report = done.import_report.unwrap();

    assert!(report.page(1).unwrap().attributed);
    let copy = report.page(2).unwrap();
    assert_eq!(copy.decode_status, DecodeStatus::Conflict);
    assert!(copy.note.as_deref().unwrap().contains("page 1"));
    assert_eq!(done.extracted_responses.unwrap().len(), 1);
}

#[test]
fn failed_extraction_leaves_question_unanswered() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[2], 1);
    let set = fx.image_set("ocr-down", &[seeded.stamp(0, 1), seeded.stamp(0, 2)]);
    let upload = fx.upload(&set, None);

    let done = fx.ingest(upload.id, &Failing).unwrap();
    let report = done.import_report.unwrap();

    assert_eq!(report.summary.resolved, 2);
    assert_eq!(report.summary.attributed, 0);
    assert_eq!(report.summary.errors, 2);
    assert!(report.pages.iter().all(|p| p
        .error
        .as_deref()
        .unwrap()
        .starts_with("text extraction failed")));
    assert!(done.extracted_responses.unwrap().is_empty());
    assert!(responses::find(&fx.db.open().unwrap(), seeded.users[0].1, seeded.questions[0])
        .unwrap()
        .is_none());
}

#[test]
fn single_participant_upload_rejects_foreign_pages() {
    let fx = Fixture::new();
    let seeded = seed_journey(&fx.db, &[1], 2);
    let set = fx.image_set("mixed", &[seeded.stamp(0, 1), seeded.stamp(1, 1)]);
    let upload = fx.upload(&set, Some(seeded.users[0].1));

    let report = fx
        .ingest(upload.id, &PageEcho::default())
        .unwrap()
        .import_report
        .unwrap();

    assert!(report.page(1).unwrap().attributed);
    let foreign = report.page(2).unwrap();
    assert!(!foreign.attributed);
    assert_eq!(
        foreign.error.as_deref(),
        Some("page belongs to a different participant than this upload")
    );
}
