mod common;

use common::*;
use curio_db::rusqlite::TransactionBehavior;
use curio_db::{Database, DbConfig};
use curio_merge::{
    ErrorKind, FieldSelections, MergeConfig, MergeEngine, MergeError, MergeLogQuery, MergeRequest,
    RelationCounts, Side,
};
use curio_model::{
    EntityRegistry, EntityType, FieldSpec, FieldType, NoArchive, RelationDirective,
    StrategyDirective, StrategyKind,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn person_merge() -> MergeRequest {
    MergeRequest::new("person", id(1), id(2), "curator")
}

fn log_count(engine: &MergeEngine) -> usize {
    engine.merge_log_count(&MergeLogQuery::new()).unwrap()
}

// ── End to end ───────────────────────────────────────────────────

#[test]
fn merges_duplicate_people() {
    let engine = engine();
    let db = engine.database().clone();

    let result = engine.merge(person_merge()).unwrap();

    assert!(!result.dry_run);
    assert!(result.archived);
    assert!(result.log_id.is_some());
    assert_eq!(result.resolved_fields["email"].value, json!("a@example.com"));
    assert_eq!(result.resolved_fields["name"].value, json!("A. Lovelace"));
    assert_eq!(
        result.resolved_fields["notes"].value,
        json!("likes tea\nprefers email\nmet at conference")
    );
    assert_eq!(result.resolved_fields["status"].value, json!("active"));

    assert_eq!(column(&db, "person", 2, "email"), json!("a@example.com"));
    assert_eq!(
        column(&db, "person", 2, "notes"),
        json!("likes tea\nprefers email\nmet at conference")
    );
    assert!(!exists(&db, "person", 1));
    assert_eq!(count(&db, "orders", "person_id", 2), 3);
    assert_eq!(count(&db, "orders", "person_id", 1), 0);

    let entries = engine.merge_log(&MergeLogQuery::new()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].relation_actions["orders"],
        RelationCounts {
            updated: 3,
            ..RelationCounts::default()
        }
    );
    assert_eq!(Some(entries[0].id), result.log_id);
}

#[test]
fn merges_accessions_with_shared_fieldslip() {
    let engine = engine();
    let db = engine.database().clone();

    let result = engine
        .merge(MergeRequest::new("accession", id(1), id(2), "curator"))
        .unwrap();

    assert_eq!(
        result.relation_actions["fieldslips"],
        RelationCounts {
            updated: 1,
            skipped: 1,
            deleted: 1,
            ..RelationCounts::default()
        }
    );
    assert_eq!(column(&db, "accession", 2, "number"), json!("KNM-ER 1470A"));
    assert_eq!(column(&db, "accession", 2, "comment"), json!("skull\ncatalogued 1972"));
    assert!(!exists(&db, "accession", 1));
    assert_eq!(
        links(&db, "accession_fieldslip", "accession_id", "fieldslip_id"),
        vec![(2, 7), (2, 8)]
    );
}

#[test]
fn source_value_on_unique_column_can_move_to_target() {
    let engine = engine();
    let request = MergeRequest::new("accession", id(1), id(2), "curator")
        .override_field("number", StrategyDirective::field_selection("KNM-ER 1470"));

    engine.merge(request).unwrap();
    assert_eq!(
        column(engine.database(), "accession", 2, "number"),
        json!("KNM-ER 1470")
    );
}

// ── Stored value types ───────────────────────────────────────────

fn scan_engine(img_strategy: StrategyDirective) -> MergeEngine {
    init_tracing();
    let db = Database::open_in_memory().unwrap();
    db.execute_batch(
        "
        CREATE TABLE scan (id INTEGER PRIMARY KEY, tags TEXT, img BLOB);
        INSERT INTO scan VALUES (1, '[\"a\"]', x'0102'), (2, '[]', x'0A0B'), (3, '{}', x'');
        ",
    )
    .unwrap();
    let scan = EntityType::new("scan", "scan")
        .with_field(FieldSpec::json("tags"))
        .with_field(FieldSpec::new("img", FieldType::Blob).with_strategy(img_strategy));
    let mut builder = EntityRegistry::builder();
    builder.register(scan).unwrap();
    MergeEngine::new(db, Arc::new(builder.build())).unwrap()
}

fn stored_img(db: &Database, id: i64) -> (String, Vec<u8>) {
    db.lock()
        .unwrap()
        .query_row("SELECT typeof(img), img FROM scan WHERE id = ?1", [id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap()
}

#[test]
fn empty_json_collection_takes_source_value() {
    let engine = scan_engine(StrategyDirective::last_write());

    let result = engine
        .merge(MergeRequest::new("scan", id(1), id(2), "curator"))
        .unwrap();

    assert_eq!(result.resolved_fields["tags"].value, json!(["a"]));
    assert_eq!(column(engine.database(), "scan", 2, "tags"), json!("[\"a\"]"));
    assert_eq!(engine.record("scan", id(2)).unwrap().get("tags"), &json!(["a"]));
}

#[test]
fn last_write_leaves_blob_untouched() {
    let engine = scan_engine(StrategyDirective::last_write());

    engine
        .merge(MergeRequest::new("scan", id(1), id(2), "curator"))
        .unwrap();

    assert_eq!(stored_img(engine.database(), 2), ("blob".to_string(), vec![10, 11]));
    let entry = &engine.merge_log(&MergeLogQuery::new()).unwrap()[0];
    assert_eq!(entry.target_snapshot_after["img"], json!({"$blob": "0a0b"}));
}

#[test]
fn empty_blob_takes_source_bytes() {
    let engine = scan_engine(StrategyDirective::prefer_non_null());

    engine
        .merge(MergeRequest::new("scan", id(1), id(3), "curator"))
        .unwrap();

    assert_eq!(stored_img(engine.database(), 3), ("blob".to_string(), vec![1, 2]));
    assert_eq!(column(engine.database(), "scan", 3, "tags"), json!("[\"a\"]"));
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn rejects_merging_record_into_itself() {
    let engine = engine();
    let err = engine
        .merge(MergeRequest::new("person", id(2), id(2), "curator"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMergeRequest);
    assert!(!err.is_retryable());
}

#[test]
fn rejects_unregistered_entity_type() {
    let engine = engine();
    let err = engine
        .merge(MergeRequest::new("taxon", id(1), id(2), "curator"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMergeRequest);
    assert!(err.to_string().contains("taxon"));
}

#[test]
fn rejects_missing_records() {
    let engine = engine();
    let err = engine
        .merge(MergeRequest::new("person", id(99), id(2), "curator"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMergeRequest);
    assert!(err.to_string().contains("#99"));
    assert_eq!(log_count(&engine), 0);
}

#[test]
fn rejects_override_for_undeclared_field() {
    let engine = engine();
    for field in ["nickname", "id"] {
        let err = engine
            .merge(person_merge().override_field(field, "LAST_WRITE"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }
    let err = engine
        .merge(person_merge().override_relation("invoices", "SKIP"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    assert!(exists(engine.database(), "person", 1));
}

#[test]
fn rejects_unknown_strategy_name() {
    let engine = engine();
    let err = engine
        .merge(person_merge().override_field("email", "NEWEST"))
        .unwrap_err();
    assert!(matches!(err, MergeError::Configuration(_)));
}

// ── Overrides ────────────────────────────────────────────────────

#[test]
fn override_replaces_default_wholesale() {
    let engine = engine();
    let result = engine
        .merge(
            person_merge()
                .override_field("email", "last_write")
                .override_field("notes", json!({"strategy": "CONCATENATE_TEXT", "separator": " | "})),
        )
        .unwrap();

    assert_eq!(result.resolved_fields["email"].value, json!(""));
    assert_eq!(
        result.resolved_fields["notes"].value,
        json!("likes tea\nprefers email | met at conference\nlikes tea")
    );

    let entry = &engine.merge_log(&MergeLogQuery::new()).unwrap()[0];
    assert_eq!(entry.strategy_map.fields["email"].kind(), StrategyKind::LastWrite);
    assert_eq!(entry.strategy_map.fields["notes"].separator(), Some(" | "));
    assert_eq!(entry.strategy_map.fields["name"].kind(), StrategyKind::LastWrite);
    assert_eq!(entry.strategy_map.relations.len(), 2);
}

#[test]
fn relation_override_to_skip_fails_when_rows_block_delete() {
    let engine = engine();
    let err = engine
        .merge(person_merge().override_relation("orders", "SKIP"))
        .unwrap_err();

    // orders reference person without ON DELETE CASCADE
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(exists(engine.database(), "person", 1));
    assert_eq!(count(engine.database(), "orders", "person_id", 1), 3);
    assert_eq!(log_count(&engine), 0);
}

#[test]
fn field_selections_become_overrides() {
    let engine = engine();
    let source = engine.record("person", id(1)).unwrap();
    let target = engine.record("person", id(2)).unwrap();

    let selections = FieldSelections::new()
        .choose("name", Side::Source)
        .set_value("email", "ada@example.org");
    let request = person_merge().with_field_overrides(selections.into_overrides(&source, &target));

    let result = engine.merge(request).unwrap();
    assert_eq!(result.resolved_fields["name"].value, json!("Ada Lovelace"));
    assert_eq!(result.resolved_fields["email"].value, json!("ada@example.org"));
    assert_eq!(
        result.resolved_fields["email"].note.as_deref(),
        Some("selected by operator")
    );
}

// ── Atomicity ────────────────────────────────────────────────────

#[test]
fn whitelist_failure_changes_nothing() {
    let engine = engine();
    let db = engine.database().clone();
    db.execute_batch(
        "UPDATE person SET status = 'lost' WHERE id = 1;
         UPDATE person SET status = 'unknown' WHERE id = 2;",
    )
    .unwrap();

    let err = engine.merge(person_merge()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidStrategyValue);
    assert_eq!(column(&db, "person", 2, "email"), json!(""));
    assert_eq!(column(&db, "person", 2, "status"), json!("unknown"));
    assert!(exists(&db, "person", 1));
    assert_eq!(count(&db, "orders", "person_id", 1), 3);
    assert_eq!(log_count(&engine), 0);
}

#[test]
fn relation_conflict_rolls_back_earlier_relations() {
    let engine = engine();
    let db = engine.database().clone();
    db.execute_batch(
        "INSERT INTO membership (person_id, club) VALUES (1, 'chess'), (2, 'chess');",
    )
    .unwrap();

    let err = engine
        .merge(person_merge().override_relation("memberships", RelationDirective::reassign()))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RelationConflict);
    // orders ran before memberships and were rolled back
    assert_eq!(count(&db, "orders", "person_id", 1), 3);
    assert_eq!(count(&db, "membership", "person_id", 1), 1);
    assert_eq!(column(&db, "person", 2, "email"), json!(""));
    assert!(exists(&db, "person", 1));
    assert_eq!(log_count(&engine), 0);
}

#[test]
fn leftover_conflicts_cascade_with_source() {
    let engine = engine();
    let db = engine.database().clone();
    db.execute_batch(
        "INSERT INTO membership (person_id, club) VALUES (1, 'chess'), (1, 'rowing'), (2, 'chess');",
    )
    .unwrap();

    let result = engine.merge(person_merge()).unwrap();

    assert_eq!(
        result.relation_actions["memberships"],
        RelationCounts {
            updated: 1,
            skipped: 1,
            ..RelationCounts::default()
        }
    );
    assert_eq!(count(&db, "membership", "person_id", 2), 2);
    assert_eq!(count(&db, "membership", "person_id", 1), 0);
}

// ── Dry run ──────────────────────────────────────────────────────

#[test]
fn preview_writes_nothing_and_predicts_real_run() {
    let engine = engine();
    let db = engine.database().clone();
    let request = MergeRequest::new("accession", id(1), id(2), "curator");

    let preview = engine.preview(request.clone()).unwrap();

    assert!(preview.dry_run);
    assert!(!preview.archived);
    assert_eq!(preview.log_id, None);
    assert_eq!(preview.relation_actions["fieldslips"].would_delete, 1);
    assert_eq!(preview.relation_actions["fieldslips"].would_update, 1);
    assert!(exists(&db, "accession", 1));
    assert_eq!(links(&db, "accession_fieldslip", "accession_id", "fieldslip_id").len(), 3);
    assert_eq!(log_count(&engine), 0);
    assert!(engine.archived("accession", id(1)).unwrap().is_empty());

    let real = engine.merge(request).unwrap();
    for (name, counts) in &real.relation_actions {
        let predicted = preview.relation_actions[name];
        assert_eq!(counts.deleted, predicted.would_delete);
        assert_eq!(counts.updated, predicted.would_update);
        assert_eq!(counts.skipped, predicted.skipped);
    }
    assert_eq!(real.resolved_fields, preview.resolved_fields);
}

#[test]
fn dry_run_flag_on_request_matches_preview() {
    let engine = engine();
    let via_flag = engine.merge(person_merge().dry_run(true)).unwrap();
    let via_preview = engine.preview(person_merge()).unwrap();
    assert_eq!(via_flag, via_preview);
    assert_eq!(via_flag.relation_actions["orders"].would_update, 3);
}

// ── Archive ──────────────────────────────────────────────────────

#[test]
fn archives_source_by_default() {
    let engine = engine();
    let result = engine.merge(person_merge()).unwrap();

    let archived = engine.archived("person", id(1)).unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(Some(archived[0].merge_log_id), result.log_id);
    assert_eq!(archived[0].snapshot.data["name"], json!("Ada Lovelace"));
    assert_eq!(archived[0].snapshot.record_id, id(1));
}

#[test]
fn archive_can_be_turned_off_per_request() {
    let engine = engine();
    let result = engine.merge(person_merge().archive(false)).unwrap();
    assert!(!result.archived);
    assert!(engine.archived("person", id(1)).unwrap().is_empty());
    assert!(!exists(engine.database(), "person", 1));
}

#[test]
fn archive_default_comes_from_config() {
    let config = MergeConfig {
        archive_by_default: false,
        ..MergeConfig::default()
    };
    let engine = engine_with(Default::default(), config);
    assert!(!engine.merge(person_merge()).unwrap().archived);
    assert!(
        engine
            .merge(MergeRequest::new("person", id(3), id(2), "curator").archive(true))
            .unwrap()
            .archived
    );
}

#[test]
fn types_can_opt_out_of_archiving() {
    let mut builder = EntityRegistry::builder();
    builder
        .register_with_hook(person_type(), Arc::new(NoArchive))
        .unwrap();
    let engine = MergeEngine::new(seeded_db(), Arc::new(builder.build())).unwrap();

    let result = engine.merge(person_merge()).unwrap();
    assert!(!result.archived);
    assert!(!exists(engine.database(), "person", 1));
}

// ── Chains ───────────────────────────────────────────────────────

#[test]
fn chain_merges_each_candidate_into_target() {
    let engine = engine();
    let db = engine.database().clone();
    let template = MergeRequest::new("person", id(0), id(2), "curator");

    let outcome = engine
        .merge_chain(&template, &[id(2), id(1), id(3), id(1)])
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.completed.len(), 2);
    assert_eq!(outcome.completed[0].source_id, id(1));
    assert_eq!(outcome.completed[1].source_id, id(3));
    assert!(!exists(&db, "person", 1));
    assert!(!exists(&db, "person", 3));

    let entries = engine.merge_log(&MergeLogQuery::new()).unwrap();
    assert_eq!(entries.len(), 2);
    let first = entries.iter().find(|e| e.source_id == id(1)).unwrap();
    let second = entries.iter().find(|e| e.source_id == id(3)).unwrap();
    assert_eq!(first.target_snapshot["email"], json!(""));
    assert_eq!(second.target_snapshot["email"], json!("a@example.com"));
    assert_eq!(first.target_snapshot_after, second.target_snapshot);
    assert_ne!(first.id, second.id);
}

#[test]
fn chain_stops_at_first_failure() {
    let engine = engine();
    let template = MergeRequest::new("person", id(0), id(2), "curator");

    let outcome = engine
        .merge_chain(&template, &[id(1), id(99), id(3), id(2)])
        .unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.completed.len(), 1);
    let failure = outcome.failed.as_ref().unwrap();
    assert_eq!(failure.source_id, id(99));
    assert_eq!(failure.error.kind(), ErrorKind::InvalidMergeRequest);
    assert_eq!(outcome.remaining, vec![id(3)]);

    // the first merge stays committed
    assert!(!exists(engine.database(), "person", 1));
    assert!(exists(engine.database(), "person", 3));
    assert_eq!(log_count(&engine), 1);
}

#[test]
fn chain_requires_target_among_candidates() {
    let engine = engine();
    let template = MergeRequest::new("person", id(0), id(2), "curator");
    let err = engine.merge_chain(&template, &[id(1), id(3)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMergeRequest);
    assert_eq!(log_count(&engine), 0);
}

// ── Concurrency ──────────────────────────────────────────────────

#[test]
fn lock_contention_is_retryable() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("curio.db");
    let config = DbConfig {
        busy_timeout_ms: 50,
        ..DbConfig::default()
    };

    let holder = Database::open(&path, &config).unwrap();
    holder.execute_batch(SCHEMA).unwrap();
    holder.execute_batch(PEOPLE).unwrap();
    let engine = MergeEngine::new(Database::open(&path, &config).unwrap(), registry()).unwrap();

    {
        let mut conn = holder.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let err = engine.merge(person_merge()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
        assert!(err.is_retryable());

        tx.rollback().unwrap();
    }

    let result = engine.merge(person_merge()).unwrap();
    assert_eq!(result.relation_actions["orders"].updated, 3);
}

#[test]
fn engine_shares_database_handle() {
    let engine = engine();
    let other = engine.database().clone();
    engine.merge(person_merge()).unwrap();
    assert_eq!(column(&other, "person", 2, "email"), Value::from("a@example.com"));
}
