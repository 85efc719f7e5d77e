//! Reference catalog repository: approved hospitals, recognized diseases,
//! authorized doctor stamps.
//!
//! Writes belong to the administrative collaborator. The validator only
//! reads, through `SqliteCatalog`, once per validation.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode};

use crate::db::{open_database_read_only, DatabaseError};
use crate::pipeline::validation::normalize::normalize;
use crate::pipeline::validation::{CatalogSnapshot, ReferenceCatalog, ReferenceStamp, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NamedTable {
    Hospitals,
    Diseases,
}

impl NamedTable {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Hospitals => "hospitals",
            Self::Diseases => "diseases",
        }
    }
}

fn insert_named(conn: &Connection, table: NamedTable, name: &str) -> Result<i64, DatabaseError> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return Err(DatabaseError::ConstraintViolation(format!(
            "{} name must not be blank",
            table.as_str()
        )));
    }

    let sql = format!(
        "INSERT INTO {} (name, normalized_name) VALUES (?1, ?2)",
        table.as_str()
    );
    match conn.execute(&sql, params![name.trim(), normalized]) {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(DatabaseError::ConstraintViolation(format!(
                "'{}' already exists in {}",
                name.trim(),
                table.as_str()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn list_named(conn: &Connection, table: NamedTable) -> Result<Vec<NamedEntry>, DatabaseError> {
    let sql = format!("SELECT id, name FROM {} ORDER BY id", table.as_str());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(NamedEntry {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn remove_named(conn: &Connection, table: NamedTable, id: i64) -> Result<(), DatabaseError> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.as_str());
    let affected = conn.execute(&sql, params![id])?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: table.as_str().into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn insert_hospital(conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
    insert_named(conn, NamedTable::Hospitals, name)
}

pub fn insert_disease(conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
    insert_named(conn, NamedTable::Diseases, name)
}

pub fn get_all_hospitals(conn: &Connection) -> Result<Vec<NamedEntry>, DatabaseError> {
    list_named(conn, NamedTable::Hospitals)
}

pub fn get_all_diseases(conn: &Connection) -> Result<Vec<NamedEntry>, DatabaseError> {
    list_named(conn, NamedTable::Diseases)
}

pub fn remove_hospital(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    remove_named(conn, NamedTable::Hospitals, id)
}

pub fn remove_disease(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    remove_named(conn, NamedTable::Diseases, id)
}

/// Register a stamp reference image already placed on durable storage.
pub fn insert_stamp(conn: &Connection, image_path: &Path) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO stamps (image_path) VALUES (?1)",
        params![image_path.to_string_lossy()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_all_stamps(conn: &Connection) -> Result<Vec<ReferenceStamp>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, image_path FROM stamps ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(ReferenceStamp {
            id: row.get(0)?,
            image_path: PathBuf::from(row.get::<_, String>(1)?),
        })
    })?;

    let mut stamps = Vec::new();
    for row in rows {
        stamps.push(row?);
    }
    Ok(stamps)
}

pub fn remove_stamp(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM stamps WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "stamps".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Read the whole catalog in one pass.
pub fn load_snapshot(conn: &Connection) -> Result<CatalogSnapshot, DatabaseError> {
    Ok(CatalogSnapshot {
        hospitals: get_all_hospitals(conn)?.into_iter().map(|e| e.name).collect(),
        diseases: get_all_diseases(conn)?.into_iter().map(|e| e.name).collect(),
        stamps: get_all_stamps(conn)?,
    })
}

/// SQLite-backed catalog. Opens a fresh read-only connection per load so
/// one instance can be shared by concurrent validations. The database must
/// already exist and be migrated.
pub struct SqliteCatalog {
    path: PathBuf,
}

impl SqliteCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReferenceCatalog for SqliteCatalog {
    fn load(&self) -> Result<CatalogSnapshot, ValidationError> {
        let conn = open_database_read_only(&self.path)?;
        Ok(load_snapshot(&conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, open_memory_database};

    #[test]
    fn insert_and_list_hospitals_in_insertion_order() {
        let conn = open_memory_database().unwrap();
        insert_hospital(&conn, "Adama General Hospital").unwrap();
        insert_hospital(&conn, "Black Lion Hospital").unwrap();

        let names: Vec<String> = get_all_hospitals(&conn)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Adama General Hospital", "Black Lion Hospital"]);
    }

    #[test]
    fn hospital_names_unique_after_normalization() {
        let conn = open_memory_database().unwrap();
        insert_hospital(&conn, "Adama General Hospital").unwrap();
        let err = insert_hospital(&conn, "  ADAMA GENERAL HOSPITAL ").unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn blank_disease_rejected() {
        let conn = open_memory_database().unwrap();
        let err = insert_disease(&conn, "   ").unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn same_name_allowed_across_tables() {
        let conn = open_memory_database().unwrap();
        insert_hospital(&conn, "Malaria Center").unwrap();
        insert_disease(&conn, "Malaria Center").unwrap();
        assert_eq!(get_all_hospitals(&conn).unwrap().len(), 1);
        assert_eq!(get_all_diseases(&conn).unwrap().len(), 1);
    }

    #[test]
    fn remove_disease_and_missing_id() {
        let conn = open_memory_database().unwrap();
        let id = insert_disease(&conn, "Malaria").unwrap();
        remove_disease(&conn, id).unwrap();
        assert!(get_all_diseases(&conn).unwrap().is_empty());

        let err = remove_disease(&conn, id).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        let hospital = insert_hospital(&conn, "Black Lion Hospital").unwrap();
        remove_hospital(&conn, hospital).unwrap();
        assert!(get_all_hospitals(&conn).unwrap().is_empty());
    }

    #[test]
    fn stamps_round_trip_paths() {
        let conn = open_memory_database().unwrap();
        let id = insert_stamp(&conn, Path::new("/srv/stamps/dr_abebe.png")).unwrap();
        let stamps = get_all_stamps(&conn).unwrap();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].id, id);
        assert_eq!(stamps[0].image_path, PathBuf::from("/srv/stamps/dr_abebe.png"));

        remove_stamp(&conn, id).unwrap();
        assert!(get_all_stamps(&conn).unwrap().is_empty());
        assert!(remove_stamp(&conn, id).is_err());
    }

    #[test]
    fn snapshot_reads_all_three_collections() {
        let conn = open_memory_database().unwrap();
        insert_hospital(&conn, "Adama General Hospital").unwrap();
        insert_disease(&conn, "Malaria").unwrap();
        insert_disease(&conn, "Tuberculosis").unwrap();
        insert_stamp(&conn, Path::new("stamp.png")).unwrap();

        let snapshot = load_snapshot(&conn).unwrap();
        assert_eq!(snapshot.hospitals, vec!["Adama General Hospital"]);
        assert_eq!(snapshot.diseases, vec!["Malaria", "Tuberculosis"]);
        assert_eq!(snapshot.stamps.len(), 1);
    }

    #[test]
    fn sqlite_catalog_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let conn = open_database(&path).unwrap();
            insert_hospital(&conn, "Adama General Hospital").unwrap();
        }

        let catalog = SqliteCatalog::new(&path);
        let snapshot = catalog.load().unwrap();
        assert_eq!(snapshot.hospitals.len(), 1);
        assert!(snapshot.diseases.is_empty());
        assert_eq!(catalog.path(), path.as_path());
    }

    #[test]
    fn missing_catalog_file_is_an_error_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("catalog.db");

        let result = SqliteCatalog::new(&path).load();
        assert!(matches!(
            result,
            Err(ValidationError::Catalog(DatabaseError::NotFound { .. }))
        ));
        assert!(!path.exists());
    }
}
