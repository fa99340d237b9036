mod support;

use secondbrain_core::service::activity_log::{ActivityLog, RowStatus};
use secondbrain_core::store::front_matter;
use secondbrain_core::transport::RawMessage;
use secondbrain_core::{AuditLog, FsItemStore, Item, ItemState, ItemStore, Pipeline};
use std::fs;
use support::{
    at, markdown_files, message, vault, FakeTransport, FlakyStore, RecordingSender,
    ScriptedClassifier, RECIPIENT,
};

#[test]
fn confident_capture_is_filed_logged_and_confirmed() {
    let (dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();

    assert!(report.phase_errors.is_empty());
    assert_eq!(report.ingest.as_ref().unwrap().summary.captured, 1);
    assert_eq!(report.summary.filed, 1);

    let destination = dir.path().join("Second Brain/Admin/Buy milk.md");
    assert_eq!(fs::read_to_string(&destination).unwrap().trim(), "Buy milk");
    assert!(markdown_files(&settings.inbox_dir()).is_empty());

    let archived = markdown_files(&settings.processed_dir());
    assert_eq!(archived.len(), 1);
    let (meta, body) = front_matter::split(&fs::read_to_string(&archived[0]).unwrap()).unwrap();
    assert_eq!(body, "Buy milk");
    assert_eq!(meta.category.as_deref(), Some("tasks"));
    assert_eq!(meta.processed, Some(true));
    assert_eq!(meta.transport_id.as_deref(), Some("M1"));
    assert_eq!(
        meta.destination.as_deref(),
        Some("Second Brain/Admin/Buy milk.md")
    );

    let rows = ActivityLog::new(settings.activity_log_path()).rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RowStatus::Filed);
    assert_eq!(rows[0].category, "tasks");
    assert_eq!(rows[0].title(), Some("Buy milk"));

    assert_eq!(
        sender.sent.borrow().as_slice(),
        &[(RECIPIENT.to_string(), "[SB] \u{2705} tasks: Buy milk".to_string())]
    );

    let audit = AuditLog::new(&settings.paths.audit_dir).recent(1).unwrap();
    assert!(audit.iter().any(|entry| entry.operation == "ingest"));
    assert!(audit.iter().any(|entry| entry.operation == "route"));
}

#[test]
fn second_run_without_new_messages_changes_nothing() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();
    let report = pipeline.run_cycle().unwrap();

    assert!(report.summary.is_empty());
    assert_eq!(report.ingest.as_ref().unwrap().fetched, 0);
    assert_eq!(classifier.calls.get(), 1);
    assert_eq!(sender.sent.borrow().len(), 1);
    assert_eq!(
        ActivityLog::new(settings.activity_log_path())
            .rows()
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn refetched_messages_are_not_captured_twice() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();

    // Losing the checkpoint replays the whole history.
    fs::remove_dir_all(&settings.paths.state_dir).unwrap();
    let report = pipeline.run_cycle().unwrap();

    let ingest = report.ingest.unwrap();
    assert_eq!(ingest.fetched, 1);
    assert_eq!(ingest.summary.duplicates, 1);
    assert_eq!(ingest.summary.captured, 0);
    assert_eq!(ingest.checkpoint_after, Some(1));
    assert!(markdown_files(&settings.inbox_dir()).is_empty());
    assert_eq!(classifier.calls.get(), 1);
}

#[test]
fn low_confidence_capture_is_held_and_asked_about_once() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("ABC123", 1, "xyz", None));
    classifier.answer("xyz", "needs_review", 0.3, "xyz");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.needs_review, 1);
    assert_eq!(report.summary.notified, 1);

    let held = store.find_by_id("ABC123").unwrap().unwrap();
    assert_eq!(held.item.state, ItemState::NeedsReview);
    assert!(held.item.notified);
    assert!(held.item.notified_at.is_some());
    assert_eq!(held.front_matter.needs_review, Some(true));
    assert_eq!(held.front_matter.category.as_deref(), Some("needs_review"));
    assert_eq!(held.front_matter.reason.as_deref(), Some("ambiguous"));
    assert_eq!(held.front_matter.feedback_sent, Some(true));

    let rows = ActivityLog::new(settings.activity_log_path()).rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, RowStatus::NeedsReview);
    assert_eq!(rows[0].destination, "-");

    pipeline.run_cycle().unwrap();
    assert_eq!(
        sender.texts(),
        vec!["[SB:ABC123] Unclear: \"xyz\". Reply: people/projects/ideas/tasks".to_string()]
    );
    assert_eq!(classifier.calls.get(), 1);
}

#[test]
fn failed_feedback_send_is_retried_on_the_next_run() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("ABC123", 1, "xyz", None));
    classifier.answer("xyz", "needs_review", 0.3, "xyz");
    sender.fail.set(true);

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.deferred, 1);

    let held = store.find_by_id("ABC123").unwrap().unwrap();
    assert!(!held.item.notified);
    assert_eq!(held.front_matter.feedback_sent, None);

    sender.fail.set(false);
    let report = pipeline.process_only().unwrap();
    assert_eq!(report.summary.notified, 1);
    assert!(store.find_by_id("ABC123").unwrap().unwrap().item.notified);
    assert_eq!(sender.texts().len(), 1);
}

#[test]
fn reply_to_feedback_refiles_the_held_item() {
    let (dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("ABC123", 1, "xyz", None));
    classifier.answer("xyz", "needs_review", 0.3, "xyz");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();
    let feedback = sender.texts().remove(0);

    // The outbound request shows up in the conversation, then the user replies.
    transport.push(message("N1", 2, &feedback, None));
    transport.push(message("R1", 3, "move to projects", Some("N1")));
    let report = pipeline.run_cycle().unwrap();

    let ingest = report.ingest.as_ref().unwrap();
    assert_eq!(ingest.summary.ignored, 1);
    assert_eq!(ingest.summary.captured, 1);
    assert_eq!(report.summary.fixed, 1);

    assert!(markdown_files(&settings.inbox_dir()).is_empty());
    let filed = store.find_by_id("ABC123").unwrap().unwrap();
    let details = filed.item.capture_details().unwrap();
    assert_eq!(filed.item.state, ItemState::Filed);
    assert_eq!(details.category.as_deref(), Some("projects"));
    assert_eq!(details.confidence, Some(1.0));
    assert_eq!(
        details.destination.as_deref(),
        Some("Second Brain/Projects/xyz.md")
    );
    assert!(dir.path().join("Second Brain/Projects/xyz.md").is_file());
    assert!(store.find_by_id("R1").unwrap().is_none());

    let rows = ActivityLog::new(settings.activity_log_path()).rows().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, RowStatus::Fixed);
    assert_eq!(rows[0].category, "projects");

    // Fixed rows are not confirmed.
    assert_eq!(sender.texts().len(), 1);
}

#[test]
fn reply_resolves_marker_from_encoded_body_and_plain_parents() {
    let (dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("A1", 1, "Dinner with Sam", None));
    transport.push(message("B1", 2, "Rust rewrite", None));
    classifier.answer("Dinner with Sam", "needs_review", 0.4, "Dinner with Sam");
    classifier.answer("Rust rewrite", "ideas", 0.9, "Rust rewrite");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();

    // Feedback whose text column is empty; only the archived body holds it.
    let mut encoded = b"\x04\x0bstreamtyped\x81NSString\x01+".to_vec();
    encoded.extend_from_slice(b"[SB:A1] Unclear");
    transport.remember(RawMessage {
        id: "N1".to_string(),
        text: None,
        encoded_body: Some(encoded),
    });
    transport.push(message("R1", 3, "people", Some("N1")));
    // Replying to the capture itself targets it directly.
    transport.push(message("R2", 4, "actually a project", Some("B1")));

    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.fixed, 2);
    assert!(dir.path().join("Second Brain/People/Dinner with Sam.md").is_file());
    assert!(dir.path().join("Second Brain/Projects/Rust rewrite.md").is_file());
    assert!(!dir.path().join("Second Brain/Ideas/Rust rewrite.md").exists());
}

#[test]
fn fix_command_moves_the_most_recent_capture() {
    let (dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Call mom", None));
    classifier.answer("Call mom", "tasks", 0.9, "Call mom");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();
    assert!(dir.path().join("Second Brain/Admin/Call mom.md").is_file());

    transport.push(message("M2", 2, "fix: people", None));
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.fixed, 1);

    assert!(!dir.path().join("Second Brain/Admin/Call mom.md").exists());
    assert!(dir.path().join("Second Brain/People/Call mom.md").is_file());
    let archived = store.find_by_id("M1").unwrap().unwrap();
    assert_eq!(
        archived.item.capture_details().unwrap().category.as_deref(),
        Some("people")
    );
    assert_eq!(markdown_files(&settings.processed_dir()).len(), 1);
}

#[test]
fn fix_command_ignores_captures_sent_after_it() {
    let (dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Call mom", None));
    transport.push(message("F1", 2, "fix: people", None));
    transport.push(message("M2", 3, "Buy milk", None));
    classifier.answer("Call mom", "tasks", 0.9, "Call mom");
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.fixed, 1);

    let moved = store.find_by_id("M1").unwrap().unwrap();
    assert_eq!(
        moved.item.capture_details().unwrap().category.as_deref(),
        Some("people")
    );
    assert!(dir.path().join("Second Brain/People/Call mom.md").is_file());

    let later = store.find_by_id("M2").unwrap().unwrap();
    assert_eq!(
        later.item.capture_details().unwrap().category.as_deref(),
        Some("tasks")
    );
    assert!(dir.path().join("Second Brain/Admin/Buy milk.md").is_file());
}

#[test]
fn reply_to_an_unknown_message_stays_pending() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("R1", 1, "people", Some("GONE")));

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(report.summary.fixed, 0);

    let pending = store.find_by_id("R1").unwrap().unwrap();
    assert!(pending.item.is_pending_correction());
    assert_eq!(
        pending.item.correction_details().unwrap().target_category.as_deref(),
        Some("people")
    );
    assert_eq!(markdown_files(&settings.inbox_dir()).len(), 1);
}

#[test]
fn correction_without_a_known_category_stays_pending() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("F1", 1, "fix: something else", None));

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let first = pipeline.run_cycle().unwrap();
    let second = pipeline.run_cycle().unwrap();
    assert_eq!(first.summary.unresolved, 1);
    assert_eq!(second.summary.unresolved, 1);

    let pending = store.find_by_id("F1").unwrap().unwrap();
    assert!(pending.item.is_pending_correction());
    assert_eq!(pending.front_matter.target_category.as_deref(), Some("unknown"));
    assert!(pending
        .item
        .body
        .contains("Could not determine target category"));
    assert_eq!(classifier.calls.get(), 0);
}

#[test]
fn classifier_failure_leaves_capture_pending_for_retry() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Plan offsite", None));

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.deferred, 1);
    assert!(store
        .find_by_id("M1")
        .unwrap()
        .unwrap()
        .item
        .is_pending_capture());

    classifier.answer("Plan offsite", "projects", 0.8, "Plan offsite");
    let report = pipeline.process_only().unwrap();
    assert_eq!(report.summary.filed, 1);
}

#[test]
fn corrupt_holding_file_does_not_block_the_batch() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    fs::create_dir_all(settings.inbox_dir()).unwrap();
    let broken = settings.inbox_dir().join("broken.md");
    fs::write(&broken, "---\nimessage_id: [unclosed\n---\n\nbody\n").unwrap();

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();

    assert_eq!(report.summary.corrupt, 1);
    assert_eq!(report.summary.filed, 1);
    assert!(broken.is_file());
}

#[test]
fn transport_failure_is_reported_and_processing_continues() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.fail_fetch.set(true);

    store
        .write_pending(&secondbrain_core::Item::capture(
            "M9",
            "imessage",
            support::at(0),
            "Buy milk",
        ))
        .unwrap();
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();

    assert!(report.ingest.is_none());
    assert_eq!(report.phase_errors.len(), 1);
    assert!(report.phase_errors[0].starts_with("ingest:"));
    assert_eq!(report.summary.filed, 1);
}

#[test]
fn system_messages_are_skipped_but_advance_the_checkpoint() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("S1", 5, "[SB] \u{2705} tasks: Buy milk", None));

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.ingest_only().unwrap();

    let ingest = report.ingest.unwrap();
    assert_eq!(ingest.summary.ignored, 1);
    assert_eq!(ingest.checkpoint_after, Some(5));
    assert!(markdown_files(&settings.inbox_dir()).is_empty());
}

#[test]
fn disabled_confirmations_skip_rows_without_sending() {
    let (_dir, mut settings) = vault();
    settings.feedback.confirmations = false;
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.run_cycle().unwrap();
    assert!(sender.texts().is_empty());

    // Re-enabling later does not replay rows that were skipped.
    settings.feedback.confirmations = true;
    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    pipeline.notify_only().unwrap();
    assert!(sender.texts().is_empty());
}

#[test]
fn empty_capture_is_skipped_without_classifying() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    store
        .write_pending(&Item::capture("E1", "imessage", at(0), ""))
        .unwrap();

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.process_only().unwrap();
    assert_eq!(report.summary.skipped_empty, 1);
    assert_eq!(report.summary.filed, 0);
    assert_eq!(classifier.calls.get(), 0);

    let held = store.find_by_id("E1").unwrap().unwrap();
    assert_eq!(held.item.state, ItemState::Pending);
    assert!(held.item.capture_details().is_some());
    assert!(sender.texts().is_empty());
}

#[test]
fn failed_confirmation_is_resent_in_order_on_the_next_run() {
    let (_dir, settings) = vault();
    let store = FsItemStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 1, "Buy milk", None));
    transport.push(message("M2", 2, "Call Bob", None));
    classifier.answer("Buy milk", "tasks", 0.95, "Buy milk");
    classifier.answer("Call Bob", "people", 0.9, "Call Bob");
    sender.fail.set(true);

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.run_cycle().unwrap();
    assert_eq!(report.summary.filed, 2);
    assert!(report.summary.deferred >= 1);
    assert!(sender.texts().is_empty());

    sender.fail.set(false);
    let report = pipeline.process_only().unwrap();
    assert_eq!(report.summary.notified, 2);
    assert_eq!(
        sender.texts(),
        vec![
            "[SB] \u{2705} tasks: Buy milk".to_string(),
            "[SB] \u{2705} people: Call Bob".to_string(),
        ]
    );

    pipeline.process_only().unwrap();
    assert_eq!(sender.texts().len(), 2);
}

#[test]
fn failed_write_keeps_checkpoint_below_messages_sharing_its_timestamp() {
    let (_dir, settings) = vault();
    let store = FlakyStore::new(&settings);
    let transport = FakeTransport::default();
    let sender = RecordingSender::default();
    let classifier = ScriptedClassifier::default();
    transport.push(message("M1", 5, "Buy milk", None));
    transport.push(message("M2", 5, "Call Bob", None));
    *store.fail_id.borrow_mut() = Some("M2".to_string());

    let pipeline = Pipeline::new(&settings, &store, &transport, &sender, &classifier);
    let report = pipeline.ingest_only().unwrap();
    let ingest = report.ingest.as_ref().unwrap();
    assert_eq!(ingest.summary.captured, 1);
    assert_eq!(ingest.summary.deferred, 1);
    assert_eq!(ingest.checkpoint_after, Some(4));

    store.fail_id.borrow_mut().take();
    let report = pipeline.ingest_only().unwrap();
    let ingest = report.ingest.as_ref().unwrap();
    assert_eq!(ingest.summary.duplicates, 1);
    assert_eq!(ingest.summary.captured, 1);
    assert_eq!(ingest.checkpoint_after, Some(5));
    assert!(store.find_by_id("M2").unwrap().is_some());
}
