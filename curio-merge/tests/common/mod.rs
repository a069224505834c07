//! Shared fixtures for merge engine tests.

#![allow(dead_code)]

use curio_db::Database;
use curio_merge::{CustomRegistry, MergeConfig, MergeEngine};
use curio_model::{
    EntityRegistry, EntityType, FieldSpec, RedundancyRule, RelationDescriptor, RelationDirective,
    StrategyDirective,
};
use curio_types::RecordId;
use serde_json::Value;
use std::sync::Arc;

pub const SCHEMA: &str = "
    CREATE TABLE person (
        id INTEGER PRIMARY KEY,
        name TEXT,
        email TEXT,
        notes TEXT,
        status TEXT
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        person_id INTEGER NOT NULL REFERENCES person(id),
        item TEXT NOT NULL
    );
    CREATE TABLE membership (
        id INTEGER PRIMARY KEY,
        person_id INTEGER NOT NULL REFERENCES person(id) ON DELETE CASCADE,
        club TEXT NOT NULL,
        UNIQUE(person_id, club)
    );

    CREATE TABLE accession (
        id INTEGER PRIMARY KEY,
        number TEXT NOT NULL UNIQUE,
        comment TEXT
    );
    CREATE TABLE fieldslip (
        id INTEGER PRIMARY KEY,
        collector TEXT
    );
    CREATE TABLE accession_fieldslip (
        accession_id INTEGER NOT NULL REFERENCES accession(id) ON DELETE CASCADE,
        fieldslip_id INTEGER NOT NULL REFERENCES fieldslip(id),
        note TEXT,
        UNIQUE(accession_id, fieldslip_id)
    );
";

/// Two duplicate people: #1 (source) and #2 (target), three orders on #1.
pub const PEOPLE: &str = "
    INSERT INTO person (id, name, email, notes, status)
        VALUES (1, 'Ada Lovelace', 'a@example.com', 'met at conference\nlikes tea', 'active');
    INSERT INTO person (id, name, email, notes, status)
        VALUES (2, 'A. Lovelace', '', 'likes tea\nprefers email', 'active');
    INSERT INTO person (id, name, email, notes, status)
        VALUES (3, 'Ada King', NULL, NULL, 'retired');
    INSERT INTO orders (person_id, item) VALUES (1, 'loom'), (1, 'engine'), (1, 'notes');
";

/// Accession #1 and #2 both link field slip 7; #1 also links 8.
pub const ACCESSIONS: &str = "
    INSERT INTO fieldslip (id, collector) VALUES (7, 'Leakey'), (8, 'Kimeu'), (9, NULL);
    INSERT INTO accession (id, number, comment) VALUES
        (1, 'KNM-ER 1470', 'skull'),
        (2, 'KNM-ER 1470A', 'skull\ncatalogued 1972'),
        (3, 'KNM-ER 1813', NULL);
    INSERT INTO accession_fieldslip (accession_id, fieldslip_id, note) VALUES
        (1, 7, 'original'),
        (1, 8, NULL),
        (2, 7, 'original');
";

pub fn id(n: i64) -> RecordId {
    RecordId::new(n)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn person_type() -> EntityType {
    EntityType::new("person", "person")
        .with_field(FieldSpec::text("name").with_strategy(StrategyDirective::last_write()))
        .with_field(FieldSpec::text("email"))
        .with_field(FieldSpec::text("notes").with_strategy(StrategyDirective::concatenate()))
        .with_field(
            FieldSpec::text("status")
                .with_strategy(StrategyDirective::whitelist(["active", "retired"])),
        )
        .with_relation(RelationDescriptor::new("orders", "orders", "person_id"))
        .with_relation(
            RelationDescriptor::new("memberships", "membership", "person_id")
                .unique_together(&["person_id", "club"]),
        )
}

pub fn accession_type() -> EntityType {
    EntityType::new("accession", "accession")
        .with_field(FieldSpec::text("number").with_strategy(StrategyDirective::last_write()))
        .with_field(FieldSpec::text("comment").with_strategy(StrategyDirective::concatenate()))
        .with_relation(
            RelationDescriptor::new("fieldslips", "accession_fieldslip", "accession_id")
                .unique_together(&["accession_id", "fieldslip_id"])
                .redundant_when(RedundancyRule::KeyOnly)
                .with_strategy(RelationDirective::merge().deduplicating(true)),
        )
}

pub fn registry() -> Arc<EntityRegistry> {
    let mut builder = EntityRegistry::builder();
    builder.register(person_type()).unwrap();
    builder.register(accession_type()).unwrap();
    Arc::new(builder.build())
}

pub fn seeded_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute_batch(SCHEMA).unwrap();
    db.execute_batch(PEOPLE).unwrap();
    db.execute_batch(ACCESSIONS).unwrap();
    db
}

pub fn engine() -> MergeEngine {
    init_tracing();
    MergeEngine::new(seeded_db(), registry()).unwrap()
}

pub fn engine_with(customs: CustomRegistry, config: MergeConfig) -> MergeEngine {
    init_tracing();
    MergeEngine::with_config(seeded_db(), registry(), customs, config).unwrap()
}

/// One column of one row, by primary key.
pub fn column(db: &Database, table: &str, id: i64, column: &str) -> Value {
    curio_db::fetch_row(&db.lock().unwrap(), table, "id", id)
        .unwrap()
        .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
        .unwrap_or(Value::Null)
}

pub fn exists(db: &Database, table: &str, id: i64) -> bool {
    curio_db::fetch_row(&db.lock().unwrap(), table, "id", id)
        .unwrap()
        .is_some()
}

pub fn count(db: &Database, table: &str, fk: &str, value: i64) -> usize {
    curio_db::count_where(&db.lock().unwrap(), table, fk, value).unwrap()
}

/// `(fk, other)` pairs of a link table, sorted.
pub fn links(db: &Database, table: &str, fk: &str, other: &str) -> Vec<(i64, i64)> {
    let conn = db.lock().unwrap();
    let mut stmt = conn
        .prepare(&format!("SELECT {fk}, {other} FROM {table} ORDER BY {fk}, {other}"))
        .unwrap();
    let pairs = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    pairs
}
