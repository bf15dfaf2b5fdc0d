//! Invalidatable assumptions
//!
//! An `Assumption` starts valid and can only ever be invalidated. Specialized
//! nodes check it on their fast path; the check is a single atomic load.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct AssumptionInner {
    name: &'static str,
    valid: AtomicBool,
}

/// Shared, one-way validity flag
#[derive(Clone)]
pub struct Assumption(Arc<AssumptionInner>);

impl Assumption {
    /// Valid assumption
    pub fn new(name: &'static str) -> Self {
        Self(Arc::new(AssumptionInner {
            name,
            valid: AtomicBool::new(true),
        }))
    }

    /// Whether nothing has broken the assumption yet
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.0.valid.load(Ordering::Acquire)
    }

    /// Mark the assumption broken. Idempotent.
    pub fn invalidate(&self) {
        if self.0.valid.swap(false, Ordering::AcqRel) {
            debug!("assumption '{}' invalidated", self.0.name);
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.0.name
    }
}

impl std::fmt::Debug for Assumption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assumption")
            .field("name", &self.0.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}
