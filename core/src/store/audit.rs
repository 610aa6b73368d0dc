use super::FlagStore;
use crate::{
    audit::{AuditAction, AuditRecord},
    collaborators::AuditLog,
    error::{CollaboratorError, FlagError, FlagResult},
    event::{format_timestamp, parse_timestamp},
};
use rusqlite::params;

impl FlagStore {
    // ── Audit log ──────────────────────────────────────────────

    pub fn append_audit(&self, record: &AuditRecord) -> FlagResult<i64> {
        self.conn.execute(
            "INSERT INTO audit_log (run_id, customer_id, rule_name, tag_name, action, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.run_id,
                record.customer_id,
                record.rule_name,
                record.tag_name,
                record.action.as_str(),
                format_timestamp(&record.timestamp),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn audit_for_customer(&self, customer_id: &str) -> FlagResult<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, customer_id, rule_name, tag_name, action, timestamp
             FROM audit_log WHERE customer_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![customer_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, run_id, customer_id, rule_name, tag_name, action, timestamp)| {
                let action = AuditAction::parse(&action)
                    .ok_or_else(|| FlagError::AuditWrite(format!("audit id={id}: unknown action '{action}'")))?;
                let timestamp = parse_timestamp(&timestamp)
                    .ok_or_else(|| FlagError::AuditWrite(format!("audit id={id}: unreadable timestamp")))?;
                Ok(AuditRecord {
                    id: Some(id),
                    run_id,
                    customer_id,
                    rule_name,
                    tag_name,
                    action,
                    timestamp,
                })
            })
            .collect()
    }

    pub fn audit_count(&self, run_id: &str) -> FlagResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

impl AuditLog for FlagStore {
    fn append(&self, record: &AuditRecord) -> Result<(), CollaboratorError> {
        self.append_audit(record)
            .map(|_| ())
            .map_err(|e| CollaboratorError::from_store("audit_log", e))
    }

    fn records_for(&self, customer_id: &str) -> Result<Vec<AuditRecord>, CollaboratorError> {
        self.audit_for_customer(customer_id)
            .map_err(|e| CollaboratorError::from_store("audit_log", e))
    }
}
