//! Hospital records example for `WardSeal`.
//!
//! Stores patients with encrypted, searchable names in a SQLite database and
//! looks them up through their blind indexes.

use tempfile::TempDir;
use wardseal::prelude::*;
use wardseal_key_file::FileKeyProvider;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("WardSeal Hospital Records Example");
    println!("=================================\n");

    // Setup: a scratch directory for the key file and database
    let dir = TempDir::new()?;
    let provider = FileKeyProvider::init(dir.path().join("root.key"))?;
    println!("✓ Root key generated at {}\n", provider.path().display());

    // Declare which fields are encrypted and which are searchable
    let schema = SchemaRegistry::new().with_entity(EntitySchema::new(
        "Patient",
        vec![
            FieldSpec::indexed("first_name"),
            FieldSpec::indexed("email").with_normalization(Normalization::CaseFold),
            FieldSpec::encrypted("medical_history"),
            FieldSpec::plain("room_id"),
        ],
    )?)?;

    let mapper = RecordMapper::from_provider(&provider, Arc::new(schema), FieldCipher::default())?;
    let repo = EncryptedRepository::new(mapper, SqliteStore::open(dir.path().join("hospital.db"))?);
    println!("✓ Repository opened with ChaCha20-Poly1305\n");

    // Save a few patients
    for (id, name, email) in [
        ("1", "Maria", "maria@example.org"),
        ("2", "Mario", "mario@example.org"),
        ("3", "Maria", "maria.lopez@example.org"),
    ] {
        repo.save(
            &PlainRecord::new("Patient", id)
                .with_field("first_name", name)
                .with_field("email", email)
                .with_field("medical_history", "routine checkup")
                .with_field("room_id", format!("20{id}")),
        )?;
    }
    println!("✓ Saved 3 patients\n");

    // What the database actually holds
    if let Some(stored) = repo.store().fetch("Patient", "1")? {
        println!("Stored first_name: {}", stored.fields["first_name"].as_deref().unwrap_or("NULL"));
        println!("Stored room_id:    {}\n", stored.fields["room_id"].as_deref().unwrap_or("NULL"));
    }
    for entry in repo.store().entries_for_entity("Patient", "1")? {
        println!("Index {} = {}", entry.name, entry.value);
    }
    println!();

    // Equality search over encrypted data
    let ids = repo.search_by_field("Patient", "first_name", "Maria")?;
    println!("Patients named Maria: {ids:?}");
    let ids = repo.search_by_field("Patient", "first_name", "Mario")?;
    println!("Patients named Mario: {ids:?}\n");

    // Case-insensitive lookup with confirmation
    for patient in repo.find_by_field("Patient", "email", "MARIA@Example.org")? {
        println!(
            "Found patient {} in room {}",
            patient.entity_id(),
            patient.get("room_id").unwrap_or("?")
        );
    }
    println!();

    // Deleting a patient removes its index entries too
    repo.delete("Patient", "1")?;
    let ids = repo.search_by_field("Patient", "first_name", "Maria")?;
    println!("After deleting patient 1, Maria matches: {ids:?}");

    let report = repo.verify_index("Patient")?.into_result()?;
    println!("✓ Blind index consistent across {} records", report.records_checked);

    Ok(())
}
