use super::FlagStore;
use crate::{
    collaborators::{Channel, ConsentLedger},
    error::{CollaboratorError, FlagResult},
    event::format_timestamp,
    types::Timestamp,
};
use rusqlite::params;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRow {
    pub consent_id:  String,
    pub customer_id: String,
    pub channel:     String,
    pub method:      String,
    pub timestamp:   String,
    pub status:      String,
}

impl FlagStore {
    // ── Consent ledger ────────────────────────────────────────

    /// Records active consent. A customer already holding active consent on
    /// the channel is left unchanged; returns whether a row was written.
    pub fn record_consent(
        &self,
        customer_id: &str,
        channel: Channel,
        method: &str,
        at: Timestamp,
    ) -> FlagResult<bool> {
        let active: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM consent_ledger
             WHERE customer_id = ?1 AND channel = ?2 AND status = 'active'",
            params![customer_id, channel.as_str()],
            |row| row.get(0),
        )?;
        if active > 0 {
            return Ok(false);
        }

        let timestamp = format_timestamp(&at);
        let consent_id = format!(
            "{:x}",
            md5::compute(format!("{customer_id}:{}:{timestamp}:{method}", channel.as_str()))
        );
        self.conn.execute(
            "INSERT OR IGNORE INTO consent_ledger (consent_id, customer_id, channel, method, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
            params![consent_id, customer_id, channel.as_str(), method, timestamp],
        )?;
        Ok(true)
    }

    pub fn consents_for(&self, customer_id: &str) -> FlagResult<Vec<ConsentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT consent_id, customer_id, channel, method, timestamp, status
             FROM consent_ledger WHERE customer_id = ?1
             ORDER BY timestamp ASC, channel ASC",
        )?;
        let rows = stmt
            .query_map(params![customer_id], |row| {
                Ok(ConsentRow {
                    consent_id: row.get(0)?,
                    customer_id: row.get(1)?,
                    channel: row.get(2)?,
                    method: row.get(3)?,
                    timestamp: row.get(4)?,
                    status: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ConsentLedger for FlagStore {
    fn record(&self, customer_id: &str, channel: Channel, method: &str, at: Timestamp) -> Result<(), CollaboratorError> {
        self.record_consent(customer_id, channel, method, at)
            .map(|_| ())
            .map_err(|e| CollaboratorError::from_store("consent_ledger", e))
    }
}
