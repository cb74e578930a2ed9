use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// The field whose uniqueness constraint rejected a new registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueField {
    /// Another registration already uses this `uid`.
    Uid,

    /// Another registration, in any organization, already uses this `display_name`.
    DisplayName,
}

impl UniqueField {
    /// The column name of the field, as used in the persisted layout.
    pub fn column(&self) -> &'static str {
        match self {
            UniqueField::Uid => "uid",
            UniqueField::DisplayName => "display_name",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} already exists", self.column())
    }
}

/// Categorizes store errors by their meaning to callers, independent of
/// the backend which produced them.
///
/// Only [`StoreErrorKind::NotFound`] and [`StoreErrorKind::AlreadyExists`]
/// describe business conditions. Everything else is folded into
/// [`StoreErrorKind::Backend`] so that an infrastructure failure can never be
/// mistaken for one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The registration targeted by a lookup, update or delete does not exist.
    ///
    /// **Caller action:** Treat as a missing resource.
    NotFound,

    /// A new registration collided with an existing one on a unique field.
    ///
    /// **Caller action:** Report the conflicting field to the client. The store
    /// was not modified.
    AlreadyExists(UniqueField),

    /// The backend failed: connectivity, I/O, malformed stored data, or a
    /// constraint violation which is not one of the known uniqueness rules.
    ///
    /// **Caller action:** Surface as an internal failure. The store never
    /// retries on its own.
    Backend,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::NotFound => write!(f, "registration not found"),
            StoreErrorKind::AlreadyExists(field) => write!(f, "{field}"),
            StoreErrorKind::Backend => write!(f, "backend failure"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Captured backtrace for debugging.
    ///
    /// Note: Backtrace capture is controlled by RUST_BACKTRACE environment variable.
    backtrace: Backtrace,

    /// Span context at the point where the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// Error returned by every registration store operation.
///
/// This error type provides:
/// - **Semantic categorization** via [`StoreErrorKind`]
/// - **Operation context** (engine, organization, uid)
/// - **Error chain preservation** via `Box<dyn Error + Send + Sync>`
/// - **Backtrace and spantrace capture** for debugging
///
/// # Example
///
/// ```rust
/// use registration_driver::{StoreError, StoreErrorKind};
///
/// let error = StoreError::builder("memory", StoreErrorKind::NotFound, "no such registration")
///     .org_id("1234")
///     .uid("abcd")
///     .build();
///
/// assert!(error.is_not_found());
/// ```
#[derive(Debug)]
pub struct StoreError {
    kind: StoreErrorKind,
    engine: &'static str,
    org_id: Option<String>,
    uid: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StoreError {
    /// Create a new store error with the minimum required information.
    ///
    /// For more control, use `StoreError::builder()`.
    pub fn new<E>(engine: &'static str, kind: StoreErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Create a builder for constructing a store error with full context.
    pub fn builder<E>(engine: &'static str, kind: StoreErrorKind, error: E) -> StoreErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StoreErrorBuilder {
            kind,
            engine,
            source: error.into(),
            org_id: None,
            uid: None,
            context: None,
        }
    }

    /// A `NotFound` error for the given key.
    pub fn not_found(engine: &'static str, org_id: Option<&str>, uid: &str) -> Self {
        let mut builder = Self::builder(
            engine,
            StoreErrorKind::NotFound,
            format!("no registration with uid {uid}"),
        )
        .uid(uid);
        if let Some(org_id) = org_id {
            builder = builder.org_id(org_id);
        }
        builder.build()
    }

    /// An `AlreadyExists` error for the given conflicting field.
    pub fn already_exists(engine: &'static str, field: UniqueField) -> Self {
        Self::new(engine, StoreErrorKind::AlreadyExists(field), field.to_string())
    }

    /// A `Backend` error for text which holds a NUL character.
    pub fn nul_text(engine: &'static str, uid: &str) -> Self {
        Self::builder(
            engine,
            StoreErrorKind::Backend,
            "text may not contain NUL characters",
        )
        .uid(uid)
        .context("validate registration")
        .build()
    }

    /// Returns a boxed closure that creates a store error from a downstream error.
    ///
    /// This is useful with `.map_err()` for simple error conversion.
    pub fn with<E>(
        engine: &'static str,
        kind: StoreErrorKind,
    ) -> Box<dyn FnOnce(E) -> StoreError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StoreError::new(engine, kind, error))
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    /// Returns the store engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the organization id, if available.
    pub fn org_id(&self) -> Option<&str> {
        self.org_id.as_deref()
    }

    /// Returns the registration uid, if available.
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether the target registration does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    /// Whether a uniqueness constraint rejected the registration.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.kind, StoreErrorKind::AlreadyExists(_))
    }

    /// The field which collided, for `AlreadyExists` errors.
    pub fn conflict(&self) -> Option<UniqueField> {
        match self.kind {
            StoreErrorKind::AlreadyExists(field) => Some(field),
            _ => None,
        }
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store error [{}] from {}", self.kind, self.engine)?;

        if let Some(org_id) = &self.org_id {
            write!(f, " (org: {})", org_id)?;
        }

        if let Some(uid) = &self.uid {
            write!(f, " (uid: {})", uid)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for constructing `StoreError` with optional context fields.
#[derive(Debug)]
pub struct StoreErrorBuilder {
    kind: StoreErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    org_id: Option<String>,
    uid: Option<String>,
    context: Option<String>,
}

impl StoreErrorBuilder {
    /// Set the organization id.
    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Set the registration uid.
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StoreError`.
    pub fn build(self) -> StoreError {
        StoreError {
            kind: self.kind,
            engine: self.engine,
            org_id: self.org_id,
            uid: self.uid,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(StoreError: Send, Sync, StdError);

    #[test]
    fn already_exists_names_the_field() {
        let err = StoreError::already_exists("memory", UniqueField::DisplayName);
        assert_eq!(err.conflict(), Some(UniqueField::DisplayName));
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        assert_eq!(err.kind().to_string(), "display_name already exists");
        assert_eq!(UniqueField::Uid.to_string(), "uid already exists");
    }

    #[test]
    fn not_found_carries_key() {
        let err = StoreError::not_found("postgres", Some("org"), "abc");
        assert!(err.is_not_found());
        assert_eq!(err.org_id(), Some("org"));
        assert_eq!(err.uid(), Some("abc"));
        assert_eq!(err.conflict(), None);

        let message = err.to_string();
        assert!(message.starts_with("Store error [registration not found] from postgres"));
        assert!(message.contains("(org: org) (uid: abc)"));
    }

    #[test]
    fn nul_text_is_a_backend_failure() {
        let err = StoreError::nul_text("memory", "abc");
        assert_eq!(err.kind(), StoreErrorKind::Backend);
        assert_eq!(err.context(), Some("validate registration"));
        assert!(!err.is_already_exists());
    }

    #[test]
    fn with_wraps_backend_failures() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::with("postgres", StoreErrorKind::Backend)(err);
        assert_eq!(err.kind(), StoreErrorKind::Backend);
        assert!(StdError::source(&err).is_some());
    }
}
