//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engine components call store methods, or the collaborator traits the
//! store implements. They never execute SQL directly.

mod audit;
mod consent;
mod contact;
mod event_log;

use crate::error::FlagResult;
use rusqlite::Connection;

pub use consent::ConsentRow;

pub struct FlagStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl FlagStore {
    pub fn open(path: &str) -> FlagResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only matters for real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FlagResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases this returns a new, isolated database.
    pub fn reopen(&self) -> FlagResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> FlagResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_event_log.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_audit_log.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_contacts.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_consent_ledger.sql"))?;
        Ok(())
    }

    /// Open + migrate in one call.
    pub fn open_migrated(path: &str) -> FlagResult<Self> {
        let store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }
}
