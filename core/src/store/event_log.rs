use super::FlagStore;
use crate::{
    collaborators::EventStore,
    error::{CollaboratorError, FlagResult},
    event::{format_timestamp, parse_timestamp, Attributes, CustomerEvent, EventType},
    types::CustomerId,
};
use rusqlite::params;

impl FlagStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &CustomerEvent) -> FlagResult<i64> {
        let payload = serde_json::to_string(&event.attributes)?;
        self.conn.execute(
            "INSERT INTO event_log (customer_id, event_type, event_date, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.customer_id,
                event.event_type.as_str(),
                format_timestamp(&event.event_date),
                payload,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// History for one customer, oldest first; ties keep insertion order.
    /// Rows whose date cannot be read are skipped with a warning.
    pub fn events_for_customer(&self, customer_id: &str) -> FlagResult<Vec<CustomerEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, event_date, payload
             FROM event_log WHERE customer_id = ?1
             ORDER BY event_date ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![customer_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (id, event_type, event_date, payload) in rows {
            let Some(at) = parse_timestamp(&event_date) else {
                log::warn!("event_log id={id} customer={customer_id}: unreadable date '{event_date}', skipped");
                continue;
            };
            let attributes: Attributes = serde_json::from_str(&payload).unwrap_or_else(|e| {
                log::warn!("event_log id={id} customer={customer_id}: unreadable payload ({e}), attributes dropped");
                Attributes::new()
            });
            events.push(CustomerEvent {
                customer_id: customer_id.to_string(),
                event_type: EventType::parse(&event_type),
                event_date: at,
                attributes,
            });
        }
        Ok(events)
    }

    pub fn customer_ids(&self) -> FlagResult<Vec<CustomerId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT customer_id FROM event_log ORDER BY customer_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn event_count(&self, customer_id: &str, event_type: &EventType) -> FlagResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE customer_id = ?1 AND event_type = ?2",
            params![customer_id, event_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

impl EventStore for FlagStore {
    fn read(&self, customer_id: &str) -> Result<Vec<CustomerEvent>, CollaboratorError> {
        self.events_for_customer(customer_id)
            .map_err(|e| CollaboratorError::from_store("event_store", e))
    }

    fn append(&self, event: &CustomerEvent) -> Result<(), CollaboratorError> {
        self.append_event(event)
            .map(|_| ())
            .map_err(|e| CollaboratorError::from_store("event_store", e))
    }

    fn customer_ids(&self) -> Result<Vec<CustomerId>, CollaboratorError> {
        FlagStore::customer_ids(self).map_err(|e| CollaboratorError::from_store("event_store", e))
    }
}
