//! # Registration store
//!
//! Configuration and unification for the registration store backends.
//!
//! A caller builds one [`StoreConfig`], turns it into a [`Store`] with
//! [`StoreConfig::build`], and shares that handle between tasks:
//!
//! ```no_run
//! use registration_store::{Page, Registration, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = StoreConfig::from_env()?.build().await?;
//!
//! store.create(&Registration::new("org", "uid", "My Device")).await?;
//! let listing = store.all("org", Page::new(10, 0)).await?;
//! assert_eq!(listing.total, 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod config;
pub(crate) mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

#[doc(inline)]
pub use config::{
    ConfigError, StoreConfig, DATABASE_HOST_ENV, DATABASE_MAX_CONNECTIONS_ENV, DATABASE_NAME_ENV,
    DATABASE_PASSWORD_ENV, DATABASE_PORT_ENV, DATABASE_USER_ENV, STORE_BACKEND_ENV,
    STORE_DELETE_MATCH_ENV,
};

#[doc(inline)]
pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
#[doc(inline)]
pub use postgres::{PostgresConfig, PostgresStore};

#[doc(inline)]
pub use registration_driver::{
    DeleteMatch, Driver, Extra, Listing, Page, Registration, RegistrationUpdate, StoreError,
    StoreErrorKind, UniqueField,
};

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to one configured store backend.
#[derive(Debug, Clone)]
pub struct Store {
    driver: ArcDriver,
}

impl<D> From<D> for Store
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Store::new(value)
    }
}

impl Store {
    /// Wrap a store driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// List the registrations in `org_id`, most recently created first.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError> {
        self.driver.all(org_id, page).await
    }

    /// Find a registration by organization and uid.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError> {
        self.driver.find(org_id, uid).await
    }

    /// Find a registration by uid, in any organization.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError> {
        self.driver.find_by_uid(uid).await
    }

    /// Create a registration, returning the identifier minted for it.
    #[tracing::instrument(
        skip(self, registration),
        fields(driver = self.driver.name(), org_id = %registration.org_id, uid = %registration.uid)
    )]
    pub async fn create(&self, registration: &Registration) -> Result<String, StoreError> {
        tracing::trace!(display_name = %registration.display_name, "creating registration");
        self.driver.create(registration).await
    }

    /// Apply a partial update to an existing registration.
    #[tracing::instrument(
        skip(self, registration),
        fields(driver = self.driver.name(), org_id = %registration.org_id, uid = %registration.uid)
    )]
    pub async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError> {
        self.driver.update(registration, update).await
    }

    /// Delete a registration.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError> {
        self.driver.delete(org_id, uid).await
    }
}
