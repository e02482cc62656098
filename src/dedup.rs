// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content fingerprinting for report deduplication.
//!
//! A fingerprint is a deterministic digest over the payload fields
//! selected by the configured [`DedupStrategy`]. Two payloads that agree
//! on the selected fields hash identically; fields outside the strategy
//! never influence the result.
//!
//! # Example
//!
//! ```
//! use report_queue::{Report, DedupStrategy, fingerprint};
//!
//! let strategy = DedupStrategy::stack_trace().with_classifier();
//!
//! let a = Report::new(b"one".to_vec())
//!     .with_stack(["main", "boom"])
//!     .with_classifier("Panic")
//!     .with_message("first occurrence");
//! let b = Report::new(b"two".to_vec())
//!     .with_stack(["main", "boom"])
//!     .with_classifier("Panic")
//!     .with_message("second occurrence");
//!
//! // Message is not selected, so the two reports collapse.
//! assert_eq!(fingerprint(&a, strategy), fingerprint(&b, strategy));
//! ```

use sha2::{Digest, Sha256};

use crate::report::Report;

/// Frames produced by the reporting library itself; excluded from the
/// stack tuple so instrumentation depth never splits fingerprints.
const LIBRARY_FRAME_PREFIXES: &[&str] = &["report_queue::", "report-queue/"];

/// Which payload fields participate in the fingerprint.
///
/// With no field selected the engine falls back to the stack-trace tuple
/// for fingerprint computation, but the store treats dedup as disabled
/// (every add creates a fresh record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(default)]
pub struct DedupStrategy {
    pub stack_trace: bool,
    pub classifier: bool,
    pub message: bool,
    pub application: bool,
}

impl DedupStrategy {
    /// No field selected; the store will not collapse duplicates.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Stack-trace-only strategy, the usual starting point.
    #[must_use]
    pub fn stack_trace() -> Self {
        Self { stack_trace: true, ..Self::default() }
    }

    #[must_use]
    pub fn with_classifier(mut self) -> Self {
        self.classifier = true;
        self
    }

    #[must_use]
    pub fn with_message(mut self) -> Self {
        self.message = true;
        self
    }

    #[must_use]
    pub fn with_application(mut self) -> Self {
        self.application = true;
        self
    }

    /// Whether the store should collapse matching records.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.stack_trace || self.classifier || self.message || self.application
    }
}

/// Compute the fingerprint for a report under a strategy.
///
/// An explicit override on the report is returned verbatim, no hashing.
pub fn fingerprint(report: &Report, strategy: DedupStrategy) -> String {
    if let Some(ref explicit) = report.fingerprint {
        return explicit.clone();
    }

    let mut tuple: Vec<String> = Vec::new();

    // Stack tuple is the default when nothing is selected.
    if strategy.stack_trace || !strategy.enabled() {
        tuple.extend(canonical_stack(&report.stack));
    }
    if strategy.classifier {
        tuple.push(format!("classifier:{}", report.classifier.as_deref().unwrap_or("")));
    }
    if strategy.message {
        tuple.push(format!("message:{}", report.message.as_deref().unwrap_or("")));
    }
    if strategy.application {
        tuple.push(format!("application:{}", report.application.as_deref().unwrap_or("")));
    }
    if let Some(ref factor) = report.factor {
        tuple.push(format!("factor:{factor}"));
    }

    let mut hasher = Sha256::new();
    for part in &tuple {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Normalized, de-duplicated, descending-sorted function names with the
/// library's own frames removed.
fn canonical_stack(frames: &[String]) -> Vec<String> {
    let mut names: Vec<String> = frames
        .iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .filter(|f| !LIBRARY_FRAME_PREFIXES.iter().any(|p| f.starts_with(p)))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crash(stack: &[&str]) -> Report {
        Report::new(b"{}".to_vec()).with_stack(stack.iter().copied())
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let report = crash(&["main", "run", "boom"]).with_classifier("Panic");
        let strategy = DedupStrategy::stack_trace().with_classifier();

        assert_eq!(fingerprint(&report, strategy), fingerprint(&report, strategy));
    }

    #[test]
    fn test_override_returned_verbatim() {
        let report = crash(&["main"]).with_fingerprint("caller-chose-this");

        assert_eq!(fingerprint(&report, DedupStrategy::none()), "caller-chose-this");
        assert_eq!(
            fingerprint(&report, DedupStrategy::stack_trace().with_message()),
            "caller-chose-this"
        );
    }

    #[test]
    fn test_unselected_fields_do_not_matter() {
        let strategy = DedupStrategy::stack_trace();
        let a = crash(&["main", "boom"]).with_message("first");
        let b = crash(&["main", "boom"]).with_message("totally different");

        assert_eq!(fingerprint(&a, strategy), fingerprint(&b, strategy));
    }

    #[test]
    fn test_selected_fields_do_matter() {
        let strategy = DedupStrategy::stack_trace().with_message();
        let a = crash(&["main", "boom"]).with_message("first");
        let b = crash(&["main", "boom"]).with_message("second");

        assert_ne!(fingerprint(&a, strategy), fingerprint(&b, strategy));
    }

    #[test]
    fn test_stack_normalization_ignores_order_and_repeats() {
        let strategy = DedupStrategy::stack_trace();
        let a = crash(&["boom", "main", "main"]);
        let b = crash(&[" main ", "boom"]);

        assert_eq!(fingerprint(&a, strategy), fingerprint(&b, strategy));
    }

    #[test]
    fn test_library_frames_excluded() {
        let strategy = DedupStrategy::stack_trace();
        let a = crash(&["main", "boom"]);
        let b = crash(&["main", "report_queue::drain::tick", "boom"]);

        assert_eq!(fingerprint(&a, strategy), fingerprint(&b, strategy));
    }

    #[test]
    fn test_factor_forces_distinctness() {
        let strategy = DedupStrategy::stack_trace();
        let a = crash(&["main", "boom"]);
        let b = crash(&["main", "boom"]).with_factor("launch-2");

        assert_ne!(fingerprint(&a, strategy), fingerprint(&b, strategy));
    }

    #[test]
    fn test_none_strategy_still_hashes_stack() {
        let a = crash(&["main", "boom"]);
        let b = crash(&["main", "other"]);

        assert_ne!(
            fingerprint(&a, DedupStrategy::none()),
            fingerprint(&b, DedupStrategy::none())
        );
    }

    #[test]
    fn test_enabled() {
        assert!(!DedupStrategy::none().enabled());
        assert!(DedupStrategy::stack_trace().enabled());
        assert!(DedupStrategy::none().with_application().enabled());
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&crash(&["main"]), DedupStrategy::stack_trace());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
