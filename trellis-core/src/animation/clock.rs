//! Async clock driver.
//!
//! Hosts with their own frame loop call [`Runtime::tick`] directly. Hosts
//! on tokio can spawn [`animate`] instead, which ticks the runtime on a
//! fixed interval until every follower has come to rest.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::reactive::Runtime;

/// Drive `runtime`'s followers every `frame` until none of them is moving.
///
/// Each tick forwards the real time elapsed since the previous one. Returns
/// the number of ticks delivered.
pub async fn animate(runtime: &Runtime, frame: Duration) -> u64 {
    let mut interval = time::interval(frame);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut frames = 0;
    let mut last = interval.tick().await;
    while runtime.is_animating() {
        let now = interval.tick().await;
        frames += 1;
        if !runtime.tick(now - last) {
            break;
        }
        last = now;
    }

    debug!(frames, "followers at rest");
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Easing, TweenInfo};

    #[tokio::test]
    async fn animate_returns_immediately_when_idle() {
        let runtime = Runtime::new();
        let frames = animate(&runtime, Duration::from_millis(5)).await;
        assert_eq!(frames, 0);
    }

    #[tokio::test]
    async fn animate_runs_tween_to_completion() {
        let runtime = Runtime::new();
        let scope = runtime.scoped();
        let goal = scope.value(0.0f64);
        let info = TweenInfo::new(Duration::from_millis(40)).easing(Easing::Linear);
        let tween = scope.tween(&goal, info).unwrap();

        goal.set(1.0);
        let frames = animate(&runtime, Duration::from_millis(5)).await;

        assert!(frames >= 1);
        assert_eq!(tween.get().unwrap(), 1.0);
        assert!(!runtime.is_animating());
    }
}
