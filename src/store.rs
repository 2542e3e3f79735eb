use crate::error::{IngestError, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info};

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite store for vacancies and applications. The unique index on
/// `applications.message_id` is the authoritative dedup gate.
pub struct Store {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vacancy {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Mailbox account whose poll created the vacancy.
    pub account_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Soft-delete state, derived from the nullable `deleted_at` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Active,
    Deleted { at: OffsetDateTime },
}

impl RecordState {
    fn from_column(deleted_at: Option<OffsetDateTime>) -> Self {
        match deleted_at {
            Some(at) => RecordState::Deleted { at },
            None => RecordState::Active,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, RecordState::Deleted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Application {
    pub id: i64,
    pub message_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    pub attachment_filename: Option<String>,
    pub is_processed: bool,
    pub state: RecordState,
    /// Written by the summarization front-end, never by ingestion.
    pub summary: Option<String>,
    pub created_at: OffsetDateTime,
    pub vacancy_id: Option<i64>,
}

/// Application fields produced by one processed message.
#[derive(Debug, Clone, Default)]
pub struct NewApplication {
    pub message_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub file_path: Option<String>,
    pub file_url: Option<String>,
    pub attachment_filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewVacancy<'a> {
    pub title: &'a str,
    pub description: String,
    pub account_id: Option<&'a str>,
}

/// Result of a committed insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredApplication {
    pub application_id: i64,
    pub vacancy_id: Option<i64>,
    pub created_new_vacancy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub vacancies: usize,
    pub applications: usize,
    pub deleted: usize,
    pub processed: usize,
}

const APPLICATION_COLUMNS: &str = "id, message_id, name, email, phone, applicant_message, file_path, file_url, \
     attachment_filename, is_processed, deleted_at, summary, created_at, vacancy_id";

impl Store {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(dir) = db_path.as_ref().parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS vacancies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE,
                description TEXT,
                account_id TEXT,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT,
                applicant_message TEXT,
                file_path TEXT,
                file_url TEXT,
                attachment_filename TEXT,
                is_processed INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                summary TEXT,
                created_at INTEGER NOT NULL,
                vacancy_id INTEGER REFERENCES vacancies(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_applications_vacancy ON applications(vacancy_id)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_applications_is_processed ON applications(is_processed)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IngestError::LockPoisoned)
    }

    /// Get an application by the provider message id, deleted or not.
    pub fn find_application_by_message_id(&self, message_id: &str) -> Result<Option<Application>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE message_id = ?1");
        Ok(conn
            .query_row(&sql, params![message_id], row_to_application)
            .optional()?)
    }

    pub fn find_vacancy_by_title(&self, title: &str) -> Result<Option<Vacancy>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, title, description, account_id, created_at FROM vacancies WHERE title = ?1",
                params![title],
                row_to_vacancy,
            )
            .optional()?)
    }

    /// Insert one application, creating its vacancy first when the title is
    /// unseen. Both writes share one transaction; a second insert for the
    /// same message id fails with `IngestError::Duplicate` and rolls back.
    pub fn insert_application(
        &self,
        app: &NewApplication,
        vacancy: Option<&NewVacancy<'_>>,
    ) -> Result<StoredApplication> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let (vacancy_id, created_new_vacancy) = match vacancy {
            Some(v) => {
                let inserted = tx.execute(
                    "INSERT INTO vacancies (title, description, account_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(title) DO NOTHING",
                    params![v.title, v.description, v.account_id, now],
                )?;
                let id: i64 = tx.query_row(
                    "SELECT id FROM vacancies WHERE title = ?1",
                    params![v.title],
                    |row| row.get(0),
                )?;
                if inserted == 1 {
                    info!(vacancy_id = id, title = %v.title, "Vacancy created");
                }
                (Some(id), inserted == 1)
            }
            None => (None, false),
        };

        let result = tx.execute(
            "INSERT INTO applications
                (message_id, name, email, phone, applicant_message, file_path, file_url,
                 attachment_filename, created_at, vacancy_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                app.message_id,
                app.name,
                app.email,
                app.phone,
                app.message,
                app.file_path,
                app.file_url,
                app.attachment_filename,
                now,
                vacancy_id,
            ],
        );

        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                debug!(message_id = %app.message_id, "Unique constraint hit, rolling back");
                return Err(IngestError::Duplicate(app.message_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        let application_id = tx.last_insert_rowid();
        tx.commit()?;

        info!(application_id, message_id = %app.message_id, "Application stored");
        Ok(StoredApplication {
            application_id,
            vacancy_id,
            created_new_vacancy,
        })
    }

    pub fn list_vacancies(&self) -> Result<Vec<Vacancy>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, account_id, created_at
             FROM vacancies
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_vacancy)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active applications, optionally for one vacancy, newest first.
    pub fn list_applications(&self, vacancy_id: Option<i64>) -> Result<Vec<Application>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {APPLICATION_COLUMNS}
             FROM applications
             WHERE deleted_at IS NULL AND (?1 IS NULL OR vacancy_id = ?1)
             ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![vacancy_id], row_to_application)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Toggle the processed flag. Returns false when no such application exists.
    pub fn set_processed(&self, application_id: i64, processed: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE applications SET is_processed = ?1 WHERE id = ?2",
            params![processed, application_id],
        )?;
        info!(application_id, processed, "Application processed flag set");
        Ok(changed == 1)
    }

    /// Mark an application deleted. Its message id stays reserved, so the
    /// message is never ingested again.
    pub fn soft_delete(&self, application_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE applications SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![OffsetDateTime::now_utc().unix_timestamp(), application_id],
        )?;
        info!(application_id, "Application soft-deleted");
        Ok(changed == 1)
    }

    pub fn restore(&self, application_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE applications SET deleted_at = NULL WHERE id = ?1 AND deleted_at IS NOT NULL",
            params![application_id],
        )?;
        Ok(changed == 1)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.lock()?;
        let count = |sql: &str| -> rusqlite::Result<usize> { conn.query_row(sql, [], |row| row.get(0)) };

        Ok(StoreCounts {
            vacancies: count("SELECT COUNT(*) FROM vacancies")?,
            applications: count("SELECT COUNT(*) FROM applications")?,
            deleted: count("SELECT COUNT(*) FROM applications WHERE deleted_at IS NOT NULL")?,
            processed: count("SELECT COUNT(*) FROM applications WHERE is_processed = 1")?,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn row_to_vacancy(row: &Row<'_>) -> rusqlite::Result<Vacancy> {
    Ok(Vacancy {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        account_id: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

/// Map a row with the `APPLICATION_COLUMNS` projection.
fn row_to_application(row: &Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        message_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        message: row.get(5)?,
        file_path: row.get(6)?,
        file_url: row.get(7)?,
        attachment_filename: row.get(8)?,
        is_processed: row.get(9)?,
        state: RecordState::from_column(optional_timestamp(row, 10)?),
        summary: row.get(11)?,
        created_at: timestamp(row, 12)?,
        vacancy_id: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_app(message_id: &str) -> NewApplication {
        NewApplication {
            message_id: message_id.to_string(),
            name: "Иван Петров".to_string(),
            email: Some("ivan@example.com".to_string()),
            ..Default::default()
        }
    }

    fn vacancy(title: &str) -> NewVacancy<'_> {
        NewVacancy {
            title,
            description: format!("Вакансия с сайта SomonTj: {title}"),
            account_id: Some("main"),
        }
    }

    #[test]
    fn test_insert_creates_vacancy_once() {
        let store = Store::open_in_memory().unwrap();

        let first = store
            .insert_application(&new_app("m1"), Some(&vacancy("Backend Developer")))
            .unwrap();
        let second = store
            .insert_application(&new_app("m2"), Some(&vacancy("Backend Developer")))
            .unwrap();

        assert!(first.created_new_vacancy);
        assert!(!second.created_new_vacancy);
        assert_eq!(first.vacancy_id, second.vacancy_id);

        let v = store.find_vacancy_by_title("Backend Developer").unwrap().unwrap();
        assert_eq!(Some(v.id), first.vacancy_id);
        assert_eq!(v.account_id.as_deref(), Some("main"));
        assert_eq!(store.list_applications(first.vacancy_id).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_message_rolls_back_vacancy() {
        let store = Store::open_in_memory().unwrap();
        store.insert_application(&new_app("m1"), None).unwrap();

        let err = store
            .insert_application(&new_app("m1"), Some(&vacancy("Fresh Title")))
            .unwrap_err();

        assert!(matches!(err, IngestError::Duplicate(ref id) if id == "m1"));
        assert!(store.find_vacancy_by_title("Fresh Title").unwrap().is_none());
        assert_eq!(store.counts().unwrap().applications, 1);
    }

    #[test]
    fn test_titles_match_exactly() {
        let store = Store::open_in_memory().unwrap();
        store.insert_application(&new_app("m1"), Some(&vacancy("QA"))).unwrap();
        let other = store.insert_application(&new_app("m2"), Some(&vacancy("qa"))).unwrap();
        assert!(other.created_new_vacancy);
        assert_eq!(store.list_vacancies().unwrap().len(), 2);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let store = Store::open_in_memory().unwrap();
        let stored = store.insert_application(&new_app("m1"), None).unwrap();

        assert!(store.soft_delete(stored.application_id).unwrap());
        assert!(!store.soft_delete(stored.application_id).unwrap());

        let app = store.find_application_by_message_id("m1").unwrap().unwrap();
        assert!(app.state.is_deleted());
        assert!(store.list_applications(None).unwrap().is_empty());

        assert!(store.restore(stored.application_id).unwrap());
        let app = store.find_application_by_message_id("m1").unwrap().unwrap();
        assert_eq!(app.state, RecordState::Active);
    }

    #[test]
    fn test_processed_flag_and_counts() {
        let store = Store::open_in_memory().unwrap();
        let a = store.insert_application(&new_app("m1"), Some(&vacancy("QA"))).unwrap();
        let b = store.insert_application(&new_app("m2"), None).unwrap();

        assert!(store.set_processed(a.application_id, true).unwrap());
        assert!(!store.set_processed(999, true).unwrap());
        store.soft_delete(b.application_id).unwrap();

        let app = store.find_application_by_message_id("m1").unwrap().unwrap();
        assert!(app.is_processed);
        assert_eq!(app.summary, None);

        assert_eq!(
            store.counts().unwrap(),
            StoreCounts {
                vacancies: 1,
                applications: 2,
                deleted: 1,
                processed: 1,
            }
        );
    }

    #[test]
    fn test_two_connections_share_dedup_gate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("intake.db");
        let cron = Store::open(&path).unwrap();
        let daemon = Store::open(&path).unwrap();

        cron.insert_application(&new_app("m1"), Some(&vacancy("QA"))).unwrap();
        let err = daemon
            .insert_application(&new_app("m1"), Some(&vacancy("QA")))
            .unwrap_err();

        assert!(matches!(err, IngestError::Duplicate(_)));
        assert_eq!(daemon.counts().unwrap().applications, 1);
    }
}
