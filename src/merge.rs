use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::{address::local_part, models::Address, models::ContactRecord};

/// Contacts observed during one sync run, keyed by lowercase email.
#[derive(Debug, Clone, Default)]
pub struct ContactAccumulator {
    contacts: BTreeMap<String, ContactRecord>,
}

impl ContactAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sighting of `person` at `at`.
    ///
    /// Sightings of `self_email` (the mailbox or calendar owner) are ignored.
    /// Returns `true` when the sighting was counted.
    pub fn observe(&mut self, person: &Address, at: DateTime<Utc>, self_email: &str) -> bool {
        let email = person.email.trim().to_lowercase();
        if email.is_empty() || email == self_email.trim().to_lowercase() {
            return false;
        }

        match self.contacts.get_mut(&email) {
            Some(existing) => {
                existing.first_seen = existing.first_seen.min(at);
                existing.last_seen = existing.last_seen.max(at);
                if existing.name.is_empty() {
                    existing.name = display_name_or_local(person, &email);
                }
            }
            None => {
                let name = display_name_or_local(person, &email);
                self.contacts.insert(
                    email.clone(),
                    ContactRecord {
                        email,
                        name,
                        first_seen: at,
                        last_seen: at,
                    },
                );
            }
        }
        true
    }

    pub fn observe_all<'a, I>(&mut self, people: I, at: DateTime<Utc>, self_email: &str)
    where
        I: IntoIterator<Item = &'a Address>,
    {
        for person in people {
            self.observe(person, at, self_email);
        }
    }

    /// Fold another accumulator into this one. Ranges widen; the name already
    /// held here is kept.
    pub fn merge(&mut self, other: ContactAccumulator) {
        for (email, incoming) in other.contacts {
            match self.contacts.get_mut(&email) {
                Some(existing) => {
                    existing.first_seen = existing.first_seen.min(incoming.first_seen);
                    existing.last_seen = existing.last_seen.max(incoming.last_seen);
                    if existing.name.is_empty() {
                        existing.name = incoming.name;
                    }
                }
                None => {
                    self.contacts.insert(email, incoming);
                }
            }
        }
    }

    pub fn known_emails(&self) -> HashSet<String> {
        self.contacts.keys().cloned().collect()
    }

    pub fn get(&self, email: &str) -> Option<&ContactRecord> {
        self.contacts.get(&email.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Contacts sorted by email.
    pub fn into_contacts(self) -> Vec<ContactRecord> {
        self.contacts.into_values().collect()
    }
}

fn display_name_or_local(person: &Address, email: &str) -> String {
    let name = person.name.trim();
    if name.is_empty() {
        local_part(email).to_string()
    } else {
        name.to_string()
    }
}
