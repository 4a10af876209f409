use crate::identity::{IdentityStore, StoreError, UserIdentity, ADMIN_ROLE, USER_ROLE};
use crate::profile::Profile;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InsertError {
    #[error("Username {0} is already taken")]
    NameTaken(String),
}

/// An [IdentityStore] that keeps identities in memory, indexed by id and by name.
///
/// Unlike a store that only relies on availability checks, inserting a name that is already
/// taken is rejected.
///
/// The first identity inserted becomes an admin, every later one a plain user.
#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    records: Arc<DashMap<String, UserIdentity>>,
    names: Arc<DashMap<String, String>>,
    admin_assigned: Arc<AtomicBool>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new identity for a sign-up profile, assigning it a random id and a default role.
    pub fn insert(&self, profile: Profile) -> Result<UserIdentity, InsertError> {
        let id = Uuid::new_v4().to_string();
        let Some(name) = profile.name.clone() else {
            return Ok(self.store_record(id, profile));
        };
        // Hold the name's entry lock so two sign-ups can't both win. The record is written
        // before the name becomes visible to lookups.
        match self.names.entry(name.clone()) {
            Entry::Occupied(_) => Err(InsertError::NameTaken(name)),
            Entry::Vacant(entry) => {
                let identity = self.store_record(id.clone(), profile);
                entry.insert(id);
                Ok(identity)
            }
        }
    }

    fn store_record(&self, id: String, profile: Profile) -> UserIdentity {
        let role = if self
            .admin_assigned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            ADMIN_ROLE
        } else {
            USER_ROLE
        };
        let identity = UserIdentity {
            id: id.clone(),
            name: profile.name,
            email: Some(profile.email),
            role: Some(role.to_string()),
        };
        self.records.insert(id, identity.clone());
        identity
    }

    pub fn get(&self, id: &str) -> Option<UserIdentity> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_name(&self, normalized: &str) -> Result<Option<UserIdentity>, StoreError> {
        let id = match self.names.get(normalized) {
            Some(id) => id.value().clone(),
            None => return Ok(None),
        };
        Ok(self.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(email: &str, name: Option<&str>) -> Profile {
        Profile::normalize(email, name).unwrap()
    }

    #[actix_web::test]
    async fn test_insert_and_find() {
        let store = InMemoryIdentityStore::new();
        let alice = store
            .insert(profile("alice@example.com", Some("Alice")))
            .unwrap();
        assert_eq!(alice.name.as_deref(), Some("alice"));
        assert_eq!(store.get(&alice.id), Some(alice.clone()));
        assert_eq!(store.find_by_name("alice").await.unwrap(), Some(alice));
        assert_eq!(store.find_by_name("bob").await.unwrap(), None);
    }

    #[test]
    fn test_name_taken() {
        let store = InMemoryIdentityStore::new();
        store.insert(profile("a@example.com", Some("alice"))).unwrap();
        assert_eq!(
            store.insert(profile("b@example.com", Some(" ALICE "))),
            Err(InsertError::NameTaken("alice".to_string()))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_nameless_identities() {
        let store = InMemoryIdentityStore::new();
        assert!(store.is_empty());
        store.insert(profile("a@example.com", None)).unwrap();
        store.insert(profile("b@example.com", None)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_default_roles() {
        let store = InMemoryIdentityStore::new();
        let first = store.insert(profile("a@example.com", Some("alice"))).unwrap();
        assert_eq!(first.role(), ADMIN_ROLE);
        // A rejected sign-up doesn't use up anything
        assert!(store.insert(profile("b@example.com", Some("alice"))).is_err());
        let second = store.insert(profile("b@example.com", Some("bob"))).unwrap();
        assert_eq!(second.role(), USER_ROLE);
        let third = store.insert(profile("c@example.com", None)).unwrap();
        assert_eq!(third.role.as_deref(), Some(USER_ROLE));
    }

    #[test]
    fn test_missing_role_reads_as_user() {
        let identity = UserIdentity {
            id: "u1".to_string(),
            name: None,
            email: None,
            role: None,
        };
        assert_eq!(identity.role(), USER_ROLE);
    }

    #[test]
    fn test_concurrent_inserts_single_admin() {
        let store = InMemoryIdentityStore::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..50 {
                        let name = format!("user{t}x{i}");
                        let email = format!("{name}@example.com");
                        store.insert(profile(&email, Some(name.as_str()))).unwrap();
                    }
                });
            }
        });
        assert_eq!(store.len(), 400);
        let admins = store
            .records
            .iter()
            .filter(|r| r.value().role() == ADMIN_ROLE)
            .count();
        assert_eq!(admins, 1);
    }

    #[test]
    fn test_claimed_name_is_never_reported_available() {
        let store = InMemoryIdentityStore::new();
        let names: Vec<String> = (0..500).map(|i| format!("name{i}")).collect();
        std::thread::scope(|s| {
            let writer = store.clone();
            let to_insert = names.clone();
            s.spawn(move || {
                for name in &to_insert {
                    let email = format!("{name}@example.com");
                    writer.insert(profile(&email, Some(name.as_str()))).unwrap();
                }
            });
            // Once a name is claimed, a lookup must find its record
            for name in &names {
                while !store.names.contains_key(name) {
                    std::thread::yield_now();
                }
                let found = futures::executor::block_on(store.find_by_name(name)).unwrap();
                assert_eq!(found.and_then(|i| i.name).as_deref(), Some(name.as_str()));
            }
        });
    }
}
