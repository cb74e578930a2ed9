use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use registration_driver::{
    DeleteMatch, Driver, Listing, Page, Registration, RegistrationUpdate, StoreError, UniqueField,
};

#[derive(Debug)]
struct MemoryEntry {
    id: Uuid,
    registration: Registration,
}

/// Store driver that keeps registrations in memory, in creation order.
///
/// Every mutation holds the write lock for its whole check-and-modify, so a
/// concurrent reader never observes a duplicate.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
    delete_match: DeleteMatch,
}

impl MemoryStore {
    /// Create a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, empty `MemoryStore` with the given delete policy.
    pub fn with_delete_match(delete_match: DeleteMatch) -> Self {
        Self {
            entries: RwLock::default(),
            delete_match,
        }
    }

    /// The number of registrations held, across all organizations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no registrations.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// The identifier minted for the registration with this `uid`, if any.
    pub async fn id_of(&self, uid: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.registration.uid == uid)
            .map(|entry| entry.id.to_string())
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError> {
        let entries = self.entries.read().await;
        let matching = entries
            .iter()
            .rev()
            .filter(|entry| entry.registration.org_id == org_id);

        let total = matching.clone().count();
        let registrations = page
            .window(matching)
            .into_iter()
            .map(|entry| entry.registration.clone())
            .collect();

        tracing::trace!(%org_id, total, "list memory registrations");
        Ok(Listing {
            registrations,
            total,
        })
    }

    async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.registration.org_id == org_id && entry.registration.uid == uid)
            .map(|entry| entry.registration.clone())
            .ok_or_else(|| StoreError::not_found(self.name(), Some(org_id), uid))
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.registration.uid == uid)
            .map(|entry| entry.registration.clone())
            .ok_or_else(|| StoreError::not_found(self.name(), None, uid))
    }

    async fn create(&self, registration: &Registration) -> Result<String, StoreError> {
        if registration.contains_nul() {
            return Err(StoreError::nul_text(self.name(), &registration.uid));
        }

        let mut entries = self.entries.write().await;

        let conflict = if entries
            .iter()
            .any(|entry| entry.registration.uid == registration.uid)
        {
            Some(UniqueField::Uid)
        } else if entries
            .iter()
            .any(|entry| entry.registration.display_name == registration.display_name)
        {
            Some(UniqueField::DisplayName)
        } else {
            None
        };

        if let Some(field) = conflict {
            tracing::warn!(uid = %registration.uid, %field, "rejected registration");
            return Err(StoreError::already_exists(self.name(), field));
        }

        let id = Uuid::new_v4();
        let mut registration = registration.clone();
        registration.created_at = Utc::now();
        tracing::debug!(%id, uid = %registration.uid, "created registration");
        entries.push(MemoryEntry { id, registration });

        Ok(id.to_string())
    }

    async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError> {
        if update.contains_nul() {
            return Err(StoreError::nul_text(self.name(), &registration.uid));
        }

        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| {
                entry.registration.org_id == registration.org_id
                    && entry.registration.uid == registration.uid
            })
            .ok_or_else(|| {
                StoreError::not_found(self.name(), Some(&registration.org_id), &registration.uid)
            })?;

        entry.registration.apply(update);
        Ok(())
    }

    async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|entry| self.delete_match.matches(&entry.registration, org_id, uid))
            .ok_or_else(|| StoreError::not_found(self.name(), Some(org_id), uid))?;

        let removed = entries.remove(index);
        tracing::debug!(id = %removed.id, uid = %removed.registration.uid, "deleted registration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use registration_driver::StoreErrorKind;

    use super::*;

    static_assertions::assert_impl_all!(MemoryStore: Send, Sync);

    #[tokio::test]
    async fn uid_conflict_is_reported_before_display_name() {
        let store = MemoryStore::new();
        store
            .create(&Registration::new("a", "1", "one"))
            .await
            .unwrap();

        let err = store
            .create(&Registration::new("b", "1", "one"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::AlreadyExists(UniqueField::Uid));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn create_mints_distinct_ids() {
        let store = MemoryStore::new();
        let first = store
            .create(&Registration::new("a", "1", "one"))
            .await
            .unwrap();
        let second = store
            .create(&Registration::new("a", "2", "two"))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.id_of("1").await.as_deref(), Some(first.as_str()));
        assert_eq!(store.id_of("3").await, None);
    }

    #[tokio::test]
    async fn delete_either_removes_oldest_match_across_orgs() {
        let store = MemoryStore::new();
        store
            .create(&Registration::new("a", "1", "one"))
            .await
            .unwrap();
        store
            .create(&Registration::new("b", "2", "two"))
            .await
            .unwrap();

        // uid "2" lives in org "b", but org "a" matches the older registration.
        store.delete("a", "2").await.unwrap();
        assert!(store.find("a", "1").await.unwrap_err().is_not_found());
        assert!(store.find("b", "2").await.is_ok());

        // org "c" has nothing, but uid "2" still matches.
        store.delete("c", "2").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_both_requires_org_and_uid() {
        let store = MemoryStore::with_delete_match(DeleteMatch::Both);
        store
            .create(&Registration::new("a", "1", "one"))
            .await
            .unwrap();
        store
            .create(&Registration::new("b", "2", "two"))
            .await
            .unwrap();

        assert!(store.delete("a", "2").await.unwrap_err().is_not_found());
        assert_eq!(store.len().await, 2);

        store.delete("b", "2").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.find("a", "1").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_creates_keep_uids_unique() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create(&Registration::new("a", "same", format!("name-{i}")))
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.len().await, 1);
    }
}
