//! # Registration store contract
//!
//! The registration model, the [`Driver`] trait implemented by every store
//! backend, and the error vocabulary shared between them.

mod driver;
mod error;
mod model;

pub use driver::DeleteMatch;
pub use driver::Driver;
pub use driver::UnknownDeleteMatch;
pub use error::StoreError;
pub use error::StoreErrorBuilder;
pub use error::StoreErrorKind;
pub use error::UniqueField;
pub use model::Extra;
pub use model::Listing;
pub use model::Page;
pub use model::Registration;
pub use model::RegistrationUpdate;
