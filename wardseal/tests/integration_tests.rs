//! Integration tests for wardseal with FileKeyProvider and SqliteStore.

use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;
use wardseal::cipher::FieldCipher;
use wardseal::config::EnvKeyProvider;
use wardseal::mapper::RecordMapper;
use wardseal::record::PlainRecord;
use wardseal::repository::{EncryptedRepository, RecordRow};
use wardseal::schema::SchemaRegistry;
use wardseal::store::{BlindIndexStore, RecordStore, SqliteStore};
use wardseal_key_file::FileKeyProvider;

const HOSPITAL_SCHEMA: &str = r#"{
    "entities": [
        {
            "entity_type": "Patient",
            "fields": [
                { "name": "first_name", "encrypted": true, "indexed": true },
                { "name": "last_name", "encrypted": true, "indexed": true },
                { "name": "email", "encrypted": true, "indexed": true, "normalize": "case_fold" },
                { "name": "medical_history", "encrypted": true },
                { "name": "room_id" }
            ]
        },
        {
            "entity_type": "Staff",
            "fields": [
                { "name": "badge_number", "encrypted": true, "indexed": true, "index_name": "badge_idx" },
                { "name": "role" }
            ]
        }
    ]
}"#;

struct Hospital {
    _dir: TempDir,
    repo: EncryptedRepository<SqliteStore>,
}

fn hospital() -> Hospital {
    // Create a temporary directory for the key and the database
    let dir = TempDir::new().expect("Failed to create temp dir");

    // Generate a root key file
    let provider =
        FileKeyProvider::init(dir.path().join("root.key")).expect("Failed to initialize key");

    // Build the mapper from the provider and the JSON schema
    let schema = SchemaRegistry::from_json(HOSPITAL_SCHEMA).expect("Invalid schema");
    let mapper = RecordMapper::from_provider(&provider, Arc::new(schema), FieldCipher::default())
        .expect("Failed to load root key");

    // Open the database
    let store = SqliteStore::open(dir.path().join("hospital.db")).expect("Failed to open db");

    Hospital { _dir: dir, repo: EncryptedRepository::new(mapper, store) }
}

fn maria() -> PlainRecord {
    PlainRecord::new("Patient", "1")
        .with_field("first_name", "Maria")
        .with_field("last_name", "Lopez")
        .with_field("email", "maria@example.org")
        .with_field("medical_history", "penicillin allergy")
        .with_field("room_id", "204")
}

#[test]
fn test_maria_is_found_and_mario_is_not() {
    let h = hospital();
    h.repo.save(&maria()).expect("Save failed");

    // The stored column must not hold the plaintext
    let stored = h.repo.store().fetch("Patient", "1").expect("Fetch failed").expect("Row missing");
    assert_ne!(stored.fields["first_name"].as_deref(), Some("Maria"));
    assert_ne!(stored.fields["medical_history"].as_deref(), Some("penicillin allergy"));
    assert_eq!(stored.fields["room_id"].as_deref(), Some("204"));

    // A first_name_index entry exists for the patient
    let entries = h.repo.store().entries_for_entity("Patient", "1").expect("Entries failed");
    assert!(entries.iter().any(|e| e.name == "first_name_index"));

    // Searching finds the patient, and only by the exact name
    let found = h.repo.search_by_field("Patient", "first_name", "Maria").expect("Search failed");
    assert!(found.contains("1"));
    let other = h.repo.search_by_field("Patient", "first_name", "Mario").expect("Search failed");
    assert!(other.is_empty());
}

#[test]
fn test_round_trip_through_database() {
    let h = hospital();
    let record = maria().with_null("last_name");
    h.repo.save(&record).expect("Save failed");

    let loaded = h.repo.load("Patient", "1").expect("Load failed");
    assert_eq!(loaded, Some(record));
}

#[test]
fn test_double_save_keeps_one_index_row() {
    let h = hospital();
    h.repo.save(&maria()).expect("Save failed");
    h.repo.save(&maria()).expect("Save failed");

    let entries = h.repo.store().entries_for_entity("Patient", "1").expect("Entries failed");
    let first_name_rows = entries.iter().filter(|e| e.name == "first_name_index").count();
    assert_eq!(first_name_rows, 1);
    assert_eq!(entries.len(), 3);
}

#[test]
fn test_delete_cascades_to_index() {
    let h = hospital();
    h.repo.save(&maria()).expect("Save failed");

    assert!(h.repo.delete("Patient", "1").expect("Delete failed"));
    assert!(h.repo.store().entries_for_entity("Patient", "1").expect("Entries failed").is_empty());
    assert!(h.repo.search_by_field("Patient", "first_name", "Maria").expect("Search failed").is_empty());
    assert_eq!(h.repo.load("Patient", "1").expect("Load failed"), None);
}

#[test]
fn test_corrupted_envelope_raises_decryption_error() {
    let h = hospital();
    h.repo.save(&maria()).expect("Save failed");

    // Flip one character of the stored ciphertext
    let mut sealed = h.repo.mapper().seal(&maria()).expect("Seal failed");
    let history = sealed.stored.fields["medical_history"].clone().expect("Missing history");
    let mut chars: Vec<char> = history.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    sealed.stored.fields.insert("medical_history".to_string(), Some(chars.into_iter().collect()));
    h.repo.store().commit(&sealed).expect("Commit failed");

    let err = h.repo.load("Patient", "1").expect_err("Corruption went unnoticed");
    assert!(err.is_decryption());
    assert!(err.to_string().contains("medical_history"));
}

#[test]
fn test_list_isolates_unreadable_records() {
    let h = hospital();
    h.repo.save(&maria()).expect("Save failed");
    h.repo
        .save(&PlainRecord::new("Patient", "2").with_field("first_name", "Mario"))
        .expect("Save failed");

    // Row 2 written under a different root key
    let foreign_dir = TempDir::new().expect("Failed to create temp dir");
    let foreign_key = FileKeyProvider::init(foreign_dir.path().join("other.key"))
        .expect("Failed to initialize key");
    let foreign = RecordMapper::from_provider(
        &foreign_key,
        Arc::new(SchemaRegistry::from_json(HOSPITAL_SCHEMA).expect("Invalid schema")),
        FieldCipher::default(),
    )
    .expect("Failed to load root key");
    let sealed = foreign
        .seal(&PlainRecord::new("Patient", "3").with_field("first_name", "Marta"))
        .expect("Seal failed");
    h.repo.store().commit(&sealed).expect("Commit failed");

    let rows = h.repo.list("Patient").expect("List failed");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|r| r.readable().is_some()).count(), 2);
    assert!(matches!(&rows[2], RecordRow::Unreadable { entity_id, .. } if entity_id == "3"));
}

#[test]
fn test_entity_types_are_isolated() {
    let h = hospital();
    h.repo
        .save(&PlainRecord::new("Staff", "1").with_field("badge_number", "B-77"))
        .expect("Save failed");
    h.repo.save(&maria()).expect("Save failed");

    let staff = h.repo.search_by_field("Staff", "badge_number", "B-77").expect("Search failed");
    assert!(staff.contains("1"));
    let entries = h.repo.store().entries_for_entity("Staff", "1").expect("Entries failed");
    assert_eq!(entries[0].name, "badge_idx");
    assert_eq!(h.repo.list("Staff").expect("List failed").len(), 1);
}

#[test]
fn test_verify_after_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let key_path = dir.path().join("root.key");
    let db_path = dir.path().join("hospital.db");
    FileKeyProvider::init(&key_path).expect("Failed to initialize key");

    let open = || {
        let provider = FileKeyProvider::new(&key_path).expect("Failed to open key");
        let schema = SchemaRegistry::from_json(HOSPITAL_SCHEMA).expect("Invalid schema");
        let mapper =
            RecordMapper::from_provider(&provider, Arc::new(schema), FieldCipher::default())
                .expect("Failed to load root key");
        EncryptedRepository::new(mapper, SqliteStore::open(&db_path).expect("Failed to open db"))
    };

    open().save(&maria()).expect("Save failed");

    let repo = open();
    let found = repo.find_by_field("Patient", "email", "MARIA@example.org").expect("Find failed");
    assert_eq!(found.len(), 1);
    assert!(repo.verify_index("Patient").expect("Verify failed").is_consistent());
}

#[test]
fn test_concurrent_saves_of_one_record_keep_index_in_sync() {
    const NAMES: [&str; 6] = ["Maria", "Mario", "Marta", "Marco", "Mara", "Marek"];
    let h = hospital();

    std::thread::scope(|scope| {
        for name in NAMES {
            let repo = &h.repo;
            scope.spawn(move || {
                for _ in 0..10 {
                    repo.save(&maria().with_field("first_name", name)).expect("Save failed");
                }
            });
        }
    });

    let loaded = h.repo.load("Patient", "1").expect("Load failed").expect("Row missing");
    let persisted = loaded.get("first_name").expect("first_name missing").to_string();
    assert!(NAMES.contains(&persisted.as_str()));

    let report = h.repo.verify_index("Patient").expect("Verify failed");
    assert_eq!(report.records_checked, 1);
    assert!(report.is_consistent());

    for name in NAMES {
        let found = h.repo.search_by_field("Patient", "first_name", name).expect("Search failed");
        if name == persisted {
            assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["1"]);
        } else {
            assert!(found.is_empty(), "stale token left for {name}");
        }
    }
}

#[test]
fn test_missing_env_key_is_configuration_error() {
    let provider = EnvKeyProvider::with_var("WARDSEAL_TEST_KEY_THAT_IS_NEVER_SET");
    let schema = SchemaRegistry::from_json(HOSPITAL_SCHEMA).expect("Invalid schema");

    let err = RecordMapper::from_provider(&provider, Arc::new(schema), FieldCipher::default())
        .expect_err("Missing key must be fatal");
    assert!(err.is_configuration());
}

fn mapper_with_key(dir: &TempDir) -> RecordMapper {
    let provider =
        FileKeyProvider::init(dir.path().join("prop.key")).expect("Failed to initialize key");
    let schema = SchemaRegistry::from_json(HOSPITAL_SCHEMA).expect("Invalid schema");
    RecordMapper::from_provider(&provider, Arc::new(schema), FieldCipher::default())
        .expect("Failed to load root key")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_seal_open_round_trip(
        first in ".{0,40}",
        history in proptest::option::of(".{0,200}"),
    ) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mapper = mapper_with_key(&dir);

        let mut record = PlainRecord::new("Patient", "p").with_field("first_name", first);
        record.set("medical_history", history);

        let sealed = mapper.seal(&record).expect("Seal failed");
        prop_assert_eq!(mapper.open(&sealed.stored).expect("Open failed"), record);
    }

    #[test]
    fn prop_index_is_deterministic(value in ".{0,60}") {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mapper = mapper_with_key(&dir);

        let a = mapper.index_token("Patient", "first_name", &value).expect("Index failed");
        let b = mapper.index_token("Patient", "first_name", &value).expect("Index failed");
        prop_assert_eq!(a, b);

        let ea = mapper.encrypt_field("Patient", "first_name", &value).expect("Encrypt failed");
        let eb = mapper.encrypt_field("Patient", "first_name", &value).expect("Encrypt failed");
        prop_assert_ne!(&ea, &eb);
        prop_assert_eq!(mapper.decrypt_field("Patient", "first_name", &ea).expect("Decrypt failed"), value.clone());
        prop_assert_eq!(mapper.decrypt_field("Patient", "first_name", &eb).expect("Decrypt failed"), value);
    }
}
