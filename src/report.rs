//! Report payload passed into the queue.
//!
//! The [`Report`] is opaque to the queue beyond its size, identity fields
//! and the optional attachment. Collaborators (capture, enrichment,
//! symbolication) build it; this crate only stores and ships it.

use std::path::PathBuf;

/// An already-serialized report payload plus the fields the
/// deduplication engine may fold into a fingerprint.
///
/// # Example
///
/// ```
/// use report_queue::Report;
///
/// let report = Report::new(br#"{"error":"oops"}"#.to_vec())
///     .with_classifier("NullReferenceException")
///     .with_message("object reference not set");
///
/// assert!(report.size_bytes() > 0);
/// assert!(report.fingerprint.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Report {
    /// Serialized payload bytes, written verbatim to disk.
    pub body: Vec<u8>,
    /// Caller-supplied fingerprint; bypasses hashing entirely when set.
    pub fingerprint: Option<String>,
    /// Optional distinctness factor folded into the computed fingerprint.
    pub factor: Option<String>,
    /// Loosely-coupled large binary (e.g. a memory dump) referenced by path.
    /// Its on-disk size is folded into the record's `size_bytes`.
    pub attachment: Option<PathBuf>,
    /// Stack function names, innermost first, as captured.
    pub stack: Vec<String>,
    /// Exception classifier (e.g. the exception type name).
    pub classifier: Option<String>,
    /// Human-readable error message.
    pub message: Option<String>,
    /// Application name attribute.
    pub application: Option<String>,
}

impl Report {
    /// Create a report from serialized payload bytes.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            fingerprint: None,
            factor: None,
            attachment: None,
            stack: Vec::new(),
            classifier: None,
            message: None,
            application: None,
        }
    }

    /// Payload size in bytes (body only; attachment size is measured
    /// against the filesystem at save time).
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_factor(mut self, factor: impl Into<String>) -> Self {
        self.factor = Some(factor.into());
        self
    }

    pub fn with_attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }

    pub fn with_stack<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stack = frames.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }
}
