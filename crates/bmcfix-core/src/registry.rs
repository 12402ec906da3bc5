//! Explicitly constructed registry of verifier components.
//!
//! Built once at startup and read-only after; threaded through callers as
//! a value instead of living in process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::verifier::SourceVerifier;

/// Named verifier instances, each carrying its own configuration.
#[derive(Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn SourceVerifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verifier under its component name. Replaces an existing
    /// entry with the same name.
    pub fn register(&mut self, verifier: Arc<dyn SourceVerifier>) {
        self.verifiers.insert(verifier.name().to_string(), verifier);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceVerifier>> {
        self.verifiers.get(name).cloned()
    }

    /// Registered component names, sorted for stable display.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.verifiers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}
