//! SQLite-backed attendance ledger.
//!
//! Holds identities, their training images, one attendance event per
//! identity per day, and the corpus version counter. Duplicate suppression
//! rests on `UNIQUE(identity_id, date)`; the check-then-insert path also runs
//! inside one transaction on the single mutex-guarded connection.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use image::GrayImage;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS identities (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        display_name  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_id  INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
        date         TEXT NOT NULL,
        time         TEXT NOT NULL,
        UNIQUE (identity_id, date)
    );
    CREATE INDEX IF NOT EXISTS idx_attendance_recent ON attendance (date DESC, time DESC);
    CREATE TABLE IF NOT EXISTS training_images (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        identity_id  INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
        width        INTEGER NOT NULL,
        height       INTEGER NOT NULL,
        pixels       BLOB NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_training_identity ON training_images (identity_id);
    CREATE TABLE IF NOT EXISTS corpus_meta (
        id       INTEGER PRIMARY KEY CHECK (id = 1),
        version  INTEGER NOT NULL
    );
    INSERT OR IGNORE INTO corpus_meta (id, version) VALUES (1, 0);
";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create ledger directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("display name must not be empty")]
    EmptyName,
    #[error("unknown identity: {0}")]
    UnknownIdentity(i64),
    #[error("training image {0} has inconsistent dimensions")]
    CorruptImage(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub id: i64,
    pub display_name: String,
    pub training_images: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub identity_id: i64,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// An attendance event joined with the identity's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub event_id: i64,
    pub identity_id: i64,
    pub display_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct TrainingImage {
    pub id: i64,
    pub identity_id: i64,
    pub image: GrayImage,
}

/// Every training image together with the corpus version they represent.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    pub version: u64,
    pub images: Vec<TrainingImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code")]
pub enum RecordOutcome {
    #[serde(rename = "MARKED")]
    Recorded(AttendanceEvent),
    /// An event for this identity and date already exists.
    #[serde(rename = "ALREADY_MARKED")]
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked {
        identity: Identity,
        event: AttendanceEvent,
    },
    AlreadyMarked {
        identity: Identity,
    },
    UnknownIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub identity: Identity,
    pub events_removed: u64,
    pub images_removed: u64,
    pub corpus_version: u64,
}

/// Clone-safe handle to the ledger database.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Open (or create) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let ledger = Self::init(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), "ledger opened");
        Ok(ledger)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_identity(&self, display_name: &str) -> Result<Identity, LedgerError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(LedgerError::EmptyName);
        }
        let conn = self.lock();
        conn.execute(
            "INSERT INTO identities (display_name) VALUES (?1)",
            params![display_name],
        )?;
        let identity = Identity {
            id: conn.last_insert_rowid(),
            display_name: display_name.to_string(),
        };
        tracing::info!(identity_id = identity.id, name = %identity.display_name, "identity created");
        Ok(identity)
    }

    pub fn get_identity(&self, id: i64) -> Result<Option<Identity>, LedgerError> {
        Ok(find_identity(&self.lock(), id)?)
    }

    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT i.id, i.display_name,
                    (SELECT COUNT(*) FROM training_images t WHERE t.identity_id = i.id)
             FROM identities i
             ORDER BY i.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentitySummary {
                id: row.get(0)?,
                display_name: row.get(1)?,
                training_images: row.get::<_, i64>(2)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn has_event_on(&self, identity_id: i64, date: NaiveDate) -> Result<bool, LedgerError> {
        Ok(event_exists(&self.lock(), identity_id, date)?)
    }

    pub fn has_event_today(&self, identity_id: i64) -> Result<bool, LedgerError> {
        self.has_event_on(identity_id, Local::now().date_naive())
    }

    /// Insert an attendance event. A second event for the same identity and
    /// date is reported as [`RecordOutcome::Duplicate`], never as an error.
    pub fn record_event(
        &self,
        identity_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<RecordOutcome, LedgerError> {
        insert_event(&self.lock(), identity_id, date, time)
    }

    /// Look up the identity, check for today's event and insert one, all in
    /// a single transaction.
    pub fn mark_attendance(&self, identity_id: i64, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let Some(identity) = find_identity(&tx, identity_id)? else {
            return Ok(MarkOutcome::UnknownIdentity);
        };

        let date = at.date();
        if event_exists(&tx, identity_id, date)? {
            return Ok(MarkOutcome::AlreadyMarked { identity });
        }

        let time = at.time().with_nanosecond(0).unwrap_or(at.time());
        let outcome = match insert_event(&tx, identity_id, date, time)? {
            RecordOutcome::Recorded(event) => MarkOutcome::Marked { identity, event },
            RecordOutcome::Duplicate => MarkOutcome::AlreadyMarked { identity },
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Every attendance event, newest first.
    pub fn list_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.identity_id, i.display_name, a.date, a.time
             FROM attendance a
             JOIN identities i ON i.id = a.identity_id
             ORDER BY a.date DESC, a.time DESC, a.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRecord {
                event_id: row.get(0)?,
                identity_id: row.get(1)?,
                display_name: row.get(2)?,
                date: parse_date(row.get(3)?, 3)?,
                time: parse_time(row.get(4)?, 4)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn event_count(&self) -> Result<u64, LedgerError> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Remove an identity with its events and training images, bumping the
    /// corpus version so the current model reads as stale.
    pub fn delete_identity_cascade(&self, identity_id: i64) -> Result<Option<DeletionReport>, LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let Some(identity) = find_identity(&tx, identity_id)? else {
            return Ok(None);
        };
        let events_removed: i64 = tx.query_row(
            "SELECT COUNT(*) FROM attendance WHERE identity_id = ?1",
            params![identity_id],
            |row| row.get(0),
        )?;
        let images_removed: i64 = tx.query_row(
            "SELECT COUNT(*) FROM training_images WHERE identity_id = ?1",
            params![identity_id],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM identities WHERE id = ?1", params![identity_id])?;
        let corpus_version = bump_corpus_version(&tx)?;
        tx.commit()?;

        tracing::info!(
            identity_id,
            events_removed,
            images_removed,
            corpus_version,
            "identity deleted"
        );
        Ok(Some(DeletionReport {
            identity,
            events_removed: events_removed as u64,
            images_removed: images_removed as u64,
            corpus_version,
        }))
    }

    /// Store a cropped grayscale face for `identity_id`. Returns the new image
    /// id and the corpus version after the insert.
    pub fn add_training_image(&self, identity_id: i64, image: &GrayImage) -> Result<(i64, u64), LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        if find_identity(&tx, identity_id)?.is_none() {
            return Err(LedgerError::UnknownIdentity(identity_id));
        }
        tx.execute(
            "INSERT INTO training_images (identity_id, width, height, pixels) VALUES (?1, ?2, ?3, ?4)",
            params![identity_id, image.width(), image.height(), image.as_raw()],
        )?;
        let image_id = tx.last_insert_rowid();
        let version = bump_corpus_version(&tx)?;
        tx.commit()?;
        Ok((image_id, version))
    }

    pub fn delete_training_image(&self, image_id: i64) -> Result<bool, LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM training_images WHERE id = ?1", params![image_id])?;
        if removed == 0 {
            return Ok(false);
        }
        let version = bump_corpus_version(&tx)?;
        tx.commit()?;
        tracing::info!(image_id, corpus_version = version, "training image removed");
        Ok(true)
    }

    pub fn corpus_version(&self) -> Result<u64, LedgerError> {
        Ok(read_corpus_version(&self.lock())?)
    }

    /// Read every training image and the version they represent in one
    /// consistent view.
    pub fn training_corpus(&self) -> Result<CorpusSnapshot, LedgerError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let version = read_corpus_version(&tx)?;

        let mut stmt = tx.prepare(
            "SELECT id, identity_id, width, height, pixels
             FROM training_images
             ORDER BY identity_id, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut images = Vec::new();
        for row in rows {
            let (id, identity_id, width, height, pixels) = row?;
            let image = GrayImage::from_raw(width, height, pixels).ok_or(LedgerError::CorruptImage(id))?;
            images.push(TrainingImage { id, identity_id, image });
        }
        Ok(CorpusSnapshot { version, images })
    }
}

fn find_identity(conn: &Connection, id: i64) -> rusqlite::Result<Option<Identity>> {
    conn.query_row(
        "SELECT id, display_name FROM identities WHERE id = ?1",
        params![id],
        |row| {
            Ok(Identity {
                id: row.get(0)?,
                display_name: row.get(1)?,
            })
        },
    )
    .optional()
}

fn event_exists(conn: &Connection, identity_id: i64, date: NaiveDate) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM attendance WHERE identity_id = ?1 AND date = ?2)",
        params![identity_id, date.format(DATE_FORMAT).to_string()],
        |row| row.get(0),
    )
}

fn insert_event(
    conn: &Connection,
    identity_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<RecordOutcome, LedgerError> {
    let result = conn.execute(
        "INSERT INTO attendance (identity_id, date, time) VALUES (?1, ?2, ?3)",
        params![
            identity_id,
            date.format(DATE_FORMAT).to_string(),
            time.format(TIME_FORMAT).to_string()
        ],
    );
    match result {
        Ok(_) => Ok(RecordOutcome::Recorded(AttendanceEvent {
            id: conn.last_insert_rowid(),
            identity_id,
            date,
            time,
        })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            tracing::debug!(identity_id, %date, "attendance insert hit unique index");
            Ok(RecordOutcome::Duplicate)
        }
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            Err(LedgerError::UnknownIdentity(identity_id))
        }
        Err(e) => Err(e.into()),
    }
}

fn read_corpus_version(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT version FROM corpus_meta WHERE id = 1", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|v| v as u64)
}

fn bump_corpus_version(tx: &Transaction<'_>) -> rusqlite::Result<u64> {
    tx.execute("UPDATE corpus_meta SET version = version + 1 WHERE id = 1", [])?;
    read_corpus_version(tx)
}

fn parse_date(text: String, idx: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_time(text: String, idx: usize) -> rusqlite::Result<NaiveTime> {
    NaiveTime::parse_from_str(&text, TIME_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
