use std::{fmt, ops::Deref, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{Listing, Page, Registration, RegistrationUpdate};

/// How [`Driver::delete`] matches its `(org_id, uid)` arguments.
///
/// Deletion has historically matched on `org_id` *or* `uid`, which means a
/// call can remove a registration belonging to a different organization.
/// `Either` keeps that behaviour for existing callers, `Both` requires both
/// keys to match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteMatch {
    /// Delete a registration whose `org_id` or `uid` matches.
    #[default]
    Either,

    /// Delete only the registration whose `org_id` and `uid` both match.
    Both,
}

impl DeleteMatch {
    /// Whether `registration` is selected for deletion by `(org_id, uid)`.
    pub fn matches(&self, registration: &Registration, org_id: &str, uid: &str) -> bool {
        match self {
            DeleteMatch::Either => registration.org_id == org_id || registration.uid == uid,
            DeleteMatch::Both => registration.org_id == org_id && registration.uid == uid,
        }
    }
}

impl fmt::Display for DeleteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteMatch::Either => f.write_str("either"),
            DeleteMatch::Both => f.write_str("both"),
        }
    }
}

/// Error returned when parsing an unknown [`DeleteMatch`] name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDeleteMatch(pub String);

impl fmt::Display for UnknownDeleteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown delete match {:?}, expected 'either' or 'both'", self.0)
    }
}

impl std::error::Error for UnknownDeleteMatch {}

impl FromStr for DeleteMatch {
    type Err = UnknownDeleteMatch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "either" | "or" => Ok(DeleteMatch::Either),
            "both" | "and" => Ok(DeleteMatch::Both),
            _ => Err(UnknownDeleteMatch(s.to_owned())),
        }
    }
}

/// A registration store backend.
///
/// Every backend must agree on uniqueness, lookup, update and delete
/// semantics, and return listings most recently created first.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// List the registrations belonging to `org_id`, within `page`.
    ///
    /// [`Listing::total`] counts every registration in the organization.
    async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError>;

    /// Find the registration with both this `org_id` and `uid`.
    async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError>;

    /// Find the registration with this `uid`, in any organization.
    async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError>;

    /// Create a registration, returning the identifier minted for it.
    ///
    /// Fails with [`crate::StoreErrorKind::AlreadyExists`] if the `uid` or the
    /// `display_name` is already taken, leaving the store unchanged. Text
    /// holding a NUL character is refused with
    /// [`crate::StoreErrorKind::Backend`], since not every backend can store it.
    async fn create(&self, registration: &Registration) -> Result<String, StoreError>;

    /// Apply `update` to the registration identified by
    /// `registration.org_id` and `registration.uid`.
    ///
    /// Replacement metadata holding a NUL character is refused like in
    /// [`Driver::create`].
    async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError>;

    /// Delete the oldest registration selected by
    /// `(org_id, uid)` under this driver's [`DeleteMatch`] policy.
    async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError> {
        self.deref().all(org_id, page).await
    }

    async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError> {
        self.deref().find(org_id, uid).await
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError> {
        self.deref().find_by_uid(uid).await
    }

    async fn create(&self, registration: &Registration) -> Result<String, StoreError> {
        self.deref().create(registration).await
    }

    async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError> {
        self.deref().update(registration, update).await
    }

    async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError> {
        self.deref().delete(org_id, uid).await
    }
}

#[async_trait::async_trait]
impl<D> Driver for &D
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        (*self).name()
    }

    async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError> {
        (*self).all(org_id, page).await
    }

    async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError> {
        (*self).find(org_id, uid).await
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError> {
        (*self).find_by_uid(uid).await
    }

    async fn create(&self, registration: &Registration) -> Result<String, StoreError> {
        (*self).create(registration).await
    }

    async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError> {
        (*self).update(registration, update).await
    }

    async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError> {
        (*self).delete(org_id, uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Driver);

    #[test]
    fn delete_match_policies() {
        let registration = Registration::new("org-a", "uid-1", "one");

        assert!(DeleteMatch::Either.matches(&registration, "org-a", "other"));
        assert!(DeleteMatch::Either.matches(&registration, "org-b", "uid-1"));
        assert!(!DeleteMatch::Either.matches(&registration, "org-b", "other"));

        assert!(DeleteMatch::Both.matches(&registration, "org-a", "uid-1"));
        assert!(!DeleteMatch::Both.matches(&registration, "org-a", "other"));
        assert!(!DeleteMatch::Both.matches(&registration, "org-b", "uid-1"));
    }

    #[test]
    fn delete_match_from_str() {
        assert_eq!("either".parse::<DeleteMatch>(), Ok(DeleteMatch::Either));
        assert_eq!(" BOTH ".parse::<DeleteMatch>(), Ok(DeleteMatch::Both));
        assert!("sometimes".parse::<DeleteMatch>().is_err());
    }
}
