//! Controller configuration

use std::time::Duration;

use crate::filter::AnnotationFilter;

/// Default requeue interval for objects rejected by the annotation filter
pub const DEFAULT_FILTER_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Default requeue interval after a retryable failure
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Runtime settings shared by every reconciliation
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Only objects whose annotations match are converged
    pub annotation_filter: AnnotationFilter,
    /// Requeue interval for filtered-out objects
    pub filter_requeue: Duration,
    /// Requeue interval after a retryable failure
    pub error_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            annotation_filter: AnnotationFilter::allow_all(),
            filter_requeue: DEFAULT_FILTER_REQUEUE,
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }
}
