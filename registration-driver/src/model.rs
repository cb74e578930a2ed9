use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata attached to a registration.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// A tenant-scoped identity record.
///
/// `uid` and `display_name` are each unique across the whole store, not just
/// within `org_id`. `created_at` is stamped by the store when the registration
/// is created; whatever the caller sets there is overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Organization which owns this registration.
    pub org_id: String,

    /// Unique identifier.
    pub uid: String,

    /// Human readable label.
    pub display_name: String,

    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,

    /// When the registration was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Registration {
    /// A new registration with no metadata.
    pub fn new(
        org_id: impl Into<String>,
        uid: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            uid: uid.into(),
            display_name: display_name.into(),
            extra: Extra::new(),
            created_at: Utc::now(),
        }
    }

    /// Replace the metadata on this registration.
    pub fn with_extra(mut self, extra: Extra) -> Self {
        self.extra = extra;
        self
    }

    /// Whether any text field, or any key or string inside `extra`, holds a
    /// NUL character.
    ///
    /// PostgreSQL cannot store NUL in `TEXT` or `JSONB`, so no backend accepts
    /// such a registration.
    pub fn contains_nul(&self) -> bool {
        [&self.org_id, &self.uid, &self.display_name]
            .into_iter()
            .any(|text| text.contains('\0'))
            || extra_contains_nul(&self.extra)
    }

    /// Apply the fields present in `update`.
    ///
    /// Identity fields and `created_at` are never touched.
    pub fn apply(&mut self, update: &RegistrationUpdate) {
        if let Some(extra) = &update.extra {
            self.extra = extra.clone();
        }
    }
}

/// A partial update to a registration. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
    /// Replacement metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Extra>,
}

impl RegistrationUpdate {
    /// An update which replaces the metadata.
    pub fn extra(extra: Extra) -> Self {
        Self { extra: Some(extra) }
    }

    /// Whether the replacement metadata holds a NUL character.
    pub fn contains_nul(&self) -> bool {
        self.extra.as_ref().is_some_and(extra_contains_nul)
    }

    /// Whether this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.extra.is_none()
    }
}

fn extra_contains_nul(extra: &Extra) -> bool {
    extra
        .iter()
        .any(|(key, value)| key.contains('\0') || value_contains_nul(value))
}

fn value_contains_nul(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains('\0'),
        serde_json::Value::Array(items) => items.iter().any(value_contains_nul),
        serde_json::Value::Object(map) => extra_contains_nul(map),
        _ => false,
    }
}

/// A pagination window for [`crate::Driver::all`].
///
/// A zero `limit` means "no upper bound", so [`Page::ALL`] returns every
/// matching registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    /// Maximum number of registrations to return, or zero for no limit.
    #[serde(default)]
    pub limit: usize,

    /// Number of registrations to skip.
    #[serde(default)]
    pub offset: usize,
}

impl Page {
    /// The unpaginated window.
    pub const ALL: Page = Page {
        limit: 0,
        offset: 0,
    };

    /// A window of at most `limit` registrations after skipping `offset`.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// The upper bound on returned items, if there is one.
    pub fn limit(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit)
    }

    /// Apply this window to an iterator which is already in listing order.
    pub fn window<I>(&self, items: I) -> Vec<I::Item>
    where
        I: IntoIterator,
    {
        let items = items.into_iter().skip(self.offset);
        match self.limit() {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}

/// One page of registrations, most recently created first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Registrations in the requested window.
    pub registrations: Vec<Registration>,

    /// Number of registrations matching the query, ignoring the window.
    pub total: usize,
}

impl Listing {
    /// Number of registrations in this page.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether this page is empty.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_only_touches_present_fields() {
        let mut registration = Registration::new("org", "uid", "name");
        let created = registration.created_at;

        registration.apply(&RegistrationUpdate::default());
        assert!(registration.extra.is_empty());

        let mut extra = Extra::new();
        extra.insert("thing".into(), json!(true));
        registration.apply(&RegistrationUpdate::extra(extra.clone()));

        assert_eq!(registration.extra, extra);
        assert_eq!(registration.org_id, "org");
        assert_eq!(registration.uid, "uid");
        assert_eq!(registration.display_name, "name");
        assert_eq!(registration.created_at, created);
    }

    #[test]
    fn nul_is_found_in_text_and_nested_extra() {
        assert!(!Registration::new("org", "uid", "name").contains_nul());
        assert!(Registration::new("org", "nul\0", "name").contains_nul());
        assert!(Registration::new("org", "uid", "\0").contains_nul());

        let mut extra = Extra::new();
        extra.insert("tags".into(), json!(["ok", {"deep": "bad\0"}]));
        assert!(Registration::new("org", "uid", "name")
            .with_extra(extra.clone())
            .contains_nul());
        assert!(RegistrationUpdate::extra(extra).contains_nul());
        assert!(!RegistrationUpdate::default().contains_nul());
    }

    #[test]
    fn page_window() {
        let items = 0..10;
        assert_eq!(Page::ALL.window(items.clone()).len(), 10);
        assert_eq!(Page::new(5, 0).window(items.clone()), vec![0, 1, 2, 3, 4]);
        assert_eq!(Page::new(5, 5).window(items.clone()), vec![5, 6, 7, 8, 9]);
        assert!(Page::new(5, 10).window(items.clone()).is_empty());
        assert_eq!(Page::new(0, 8).window(items), vec![8, 9]);
    }

    #[test]
    fn registration_json_shape() {
        let registration: Registration = serde_json::from_value(json!({
            "org_id": "1234",
            "uid": "abcd",
            "display_name": "thing",
        }))
        .unwrap();
        assert!(registration.extra.is_empty());

        let value = serde_json::to_value(&registration).unwrap();
        assert!(value.get("extra").is_none());
        assert!(value.get("created_at").is_some());
    }
}
