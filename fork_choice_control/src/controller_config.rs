use core::time::Duration;

use derivative::Derivative;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct ControllerConfig {
    #[derivative(Default(value = "Duration::from_secs(12)"))]
    pub state_transition_timeout: Duration,
    /// Applies to each attempt separately.
    #[derivative(Default(value = "Duration::from_secs(8)"))]
    pub engine_request_timeout: Duration,
    #[derivative(Default(value = "3"))]
    pub engine_max_attempts: u32,
    #[derivative(Default(value = "Duration::from_millis(100)"))]
    pub engine_initial_backoff: Duration,
    #[derivative(Default(value = "Duration::from_secs(2)"))]
    pub engine_max_backoff: Duration,
}

impl ControllerConfig {
    /// Delay before retrying after a failed attempt. `attempt` starts at 1.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);

        self.engine_initial_backoff
            .saturating_mul(factor)
            .min(self.engine_max_backoff)
    }
}
