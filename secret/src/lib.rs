//! A string wrapper for credentials which should never be logged.

use std::{borrow::Cow, fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A credential, such as a database password.
///
/// This wrapper keeps the value out of debug reprs and zeroizes owned
/// values when dropped.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Whether the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

/// Tiny wrapper struct to indicate that the inner object should
/// be directly printed in fmt::Debug implementations.
struct DirectDebug<D>(D);

impl<D> fmt::Debug for DirectDebug<D>
where
    D: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&DirectDebug("****")).finish()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.revealed() == other.revealed()
    }
}

impl Eq for Secret {}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}
