use super::FlagStore;
use crate::{
    collaborators::{Contact, IdentityLookup},
    error::{CollaboratorError, FlagResult},
};
use rusqlite::{params, OptionalExtension};

fn blank_to_none(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl FlagStore {
    // ── Contacts & households ─────────────────────────────────

    pub fn upsert_contact(&self, customer_id: &str, email: Option<&str>, phone: Option<&str>) -> FlagResult<()> {
        self.conn.execute(
            "INSERT INTO customer_contact (customer_id, email, phone) VALUES (?1, ?2, ?3)
             ON CONFLICT (customer_id) DO UPDATE SET email = excluded.email, phone = excluded.phone",
            params![customer_id, email, phone],
        )?;
        Ok(())
    }

    pub fn link_family(&self, parent_customer_id: &str, child_customer_id: &str) -> FlagResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO family_relationship (parent_customer_id, child_customer_id)
             VALUES (?1, ?2)",
            params![parent_customer_id, child_customer_id],
        )?;
        Ok(())
    }

    fn own_contact(&self, customer_id: &str) -> FlagResult<Option<Contact>> {
        let row = self
            .conn
            .query_row(
                "SELECT email, phone FROM customer_contact WHERE customer_id = ?1",
                params![customer_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(email, phone)| Contact {
            email: blank_to_none(email),
            phone: blank_to_none(phone),
            via_parent: false,
        }))
    }

    /// The customer's own contact. A customer with neither email nor phone
    /// uses their first parent's contact, marked `via_parent`.
    pub fn contact_for(&self, customer_id: &str) -> FlagResult<Contact> {
        let own = self.own_contact(customer_id)?.unwrap_or_default();
        if own.email.is_some() || own.phone.is_some() {
            return Ok(own);
        }

        let parent: Option<String> = self
            .conn
            .query_row(
                "SELECT parent_customer_id FROM family_relationship
                 WHERE child_customer_id = ?1
                 ORDER BY parent_customer_id ASC LIMIT 1",
                params![customer_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(parent) = parent else { return Ok(own) };

        match self.own_contact(&parent)? {
            Some(c) if c.email.is_some() || c.phone.is_some() => Ok(Contact { via_parent: true, ..c }),
            _ => Ok(own),
        }
    }
}

impl IdentityLookup for FlagStore {
    fn lookup(&self, customer_id: &str) -> Result<Contact, CollaboratorError> {
        self.contact_for(customer_id)
            .map_err(|e| CollaboratorError::from_store("identity", e))
    }
}
