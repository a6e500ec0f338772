//! Runtime configuration.

use serde::Deserialize;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
///
/// Hosts usually build this in code, but it also deserializes from any
/// serde format so it can live next to the host's own settings:
///
/// ```rust
/// use trellis_core::RuntimeConfig;
///
/// let config: RuntimeConfig = serde_json::from_str(r#"{ "settle_epsilon": 0.01 }"#).unwrap();
/// assert_eq!(config.settle_epsilon, 0.01);
/// assert!(config.report_errors);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log non-fatal errors through `tracing` in addition to the host handler.
    pub report_errors: bool,

    /// Distance and speed below which a follower counts as at rest.
    pub settle_epsilon: f64,

    /// Longest clock step forwarded to followers, in seconds. Longer ticks
    /// (a host that was suspended, a debugger pause) are clamped.
    pub max_frame_step: f64,

    /// Integration step used by springs, in seconds.
    pub spring_substep: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            report_errors: true,
            settle_epsilon: 1e-4,
            max_frame_step: 0.25,
            spring_substep: 1.0 / 240.0,
        }
    }
}

impl RuntimeConfig {
    pub fn report_errors(mut self, report_errors: bool) -> Self {
        self.report_errors = report_errors;
        self
    }

    pub fn settle_epsilon(mut self, settle_epsilon: f64) -> Self {
        self.settle_epsilon = settle_epsilon;
        self
    }

    pub fn max_frame_step(mut self, max_frame_step: f64) -> Self {
        self.max_frame_step = max_frame_step;
        self
    }

    pub fn spring_substep(mut self, spring_substep: f64) -> Self {
        self.spring_substep = spring_substep;
        self
    }
}
