//! Tween Implementation
//!
//! A Tween follows a goal state along a timed, eased curve.
//!
//! # How Tweens Work
//!
//! 1. When the goal changes, the tween starts a new curve from wherever it
//!    currently is, using the timing in effect at that moment.
//!
//! 2. Every host clock tick advances the curve. The tween re-evaluates,
//!    and if its value moved, its dependents update before the tick returns.
//!
//! 3. Once the curve ends, the tween sits exactly on the goal and stops
//!    asking for ticks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::animatable::{lerp, Animatable, Components};
use super::easing::Easing;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};
use crate::reactive::runtime::{Evaluate, Follow, Runtime};
use crate::reactive::{peek, Scope, StateObject, Use, UsedAs};

/// Timing of a tween.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweenInfo {
    /// Length of the curve, excluding the delay.
    pub duration: Duration,
    pub easing: Easing,
    /// Time to wait after the goal changes before moving.
    pub delay: Duration,
}

impl Default for TweenInfo {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(1),
            easing: Easing::EaseOutQuad,
            delay: Duration::ZERO,
        }
    }
}

impl TweenInfo {
    /// Timing with the given duration and the default curve.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl From<TweenInfo> for UsedAs<TweenInfo> {
    fn from(info: TweenInfo) -> Self {
        UsedAs::Constant(info)
    }
}

/// Where the current curve starts and ends.
struct Curve {
    from: Components,
    to: Components,
    info: TweenInfo,
    elapsed: f64,
}

impl Curve {
    fn progress(&self) -> f64 {
        let duration = self.info.duration.as_secs_f64();
        let elapsed = self.elapsed - self.info.delay.as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else if duration <= 0.0 {
            1.0
        } else {
            (elapsed / duration).min(1.0)
        }
    }

    fn finished(&self) -> bool {
        self.elapsed >= self.info.delay.as_secs_f64() + self.info.duration.as_secs_f64()
    }

    fn sample(&self) -> Components {
        lerp(&self.from, &self.to, self.info.easing.apply(self.progress()))
    }
}

#[derive(Default)]
struct TweenState {
    current: Option<Components>,
    curve: Option<Curve>,

    /// Clock time not yet applied to the curve.
    pending: f64,
}

struct TweenNode<T> {
    goal: UsedAs<T>,
    info: UsedAs<TweenInfo>,
    state: Mutex<TweenState>,
    output: Arc<RwLock<Option<T>>>,
}

impl<T: Animatable> Evaluate for TweenNode<T> {
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError> {
        let goal = cx.resolve(&self.goal)?.to_components();
        let info = cx.resolve(&self.info)?;

        let next = {
            let mut state = self.state.lock();
            let state = &mut *state;
            let pending = std::mem::take(&mut state.pending);

            let Some(current) = state.current.clone() else {
                // First evaluation: start on the goal.
                state.current = Some(goal.clone());
                return Ok(self.store(goal));
            };

            let target = state.curve.as_ref().map_or(&current, |curve| &curve.to);
            if *target != goal {
                trace!(node = ?cx.evaluator(), "tween retargeted");
                state.curve = Some(Curve {
                    from: current,
                    to: goal,
                    info,
                    elapsed: 0.0,
                });
            } else if let Some(curve) = state.curve.as_mut() {
                curve.elapsed += pending;
            }

            match &state.curve {
                Some(curve) if curve.finished() => {
                    let end = curve.to.clone();
                    state.curve = None;
                    end
                }
                Some(curve) => curve.sample(),
                None => return Ok(false),
            }
        };

        self.state.lock().current = Some(next.clone());
        Ok(self.store(next))
    }
}

impl<T: Animatable> TweenNode<T> {
    fn store(&self, components: Components) -> bool {
        let value = T::from_components(&components);
        let mut output = self.output.write();
        let changed = output.as_ref() != Some(&value);
        *output = Some(value);
        changed
    }
}

impl<T: Animatable> Follow for TweenNode<T> {
    fn advance(&self, seconds: f64) {
        self.state.lock().pending += seconds;
    }

    fn is_moving(&self) -> bool {
        self.state.lock().curve.is_some()
    }
}

/// Follows a goal state along a timed curve.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use trellis_core::{Easing, Runtime, TweenInfo};
///
/// let runtime = Runtime::new();
/// let scope = runtime.scoped();
/// let target = scope.value(0.0f64);
///
/// let info = TweenInfo::new(Duration::from_secs(1)).easing(Easing::Linear);
/// let position = scope.tween(&target, info).unwrap();
///
/// target.set(10.0);
/// runtime.tick(Duration::from_millis(250));
/// assert!((position.get().unwrap() - 2.5).abs() < 1e-9);
/// ```
pub struct Tween<T> {
    node: NodeId,
    runtime: Runtime,
    output: Arc<RwLock<Option<T>>>,
    follower: Arc<dyn Follow>,
}

impl<T: Animatable> Tween<T> {
    /// Create a tween in `scope`, starting on the current goal.
    pub fn new(
        scope: &Scope,
        goal: impl Into<UsedAs<T>>,
        info: impl Into<UsedAs<TweenInfo>>,
    ) -> Result<Self, ReactiveError> {
        let output = Arc::new(RwLock::new(None));
        let behaviour = Arc::new(TweenNode {
            goal: goal.into(),
            info: info.into(),
            state: Mutex::new(TweenState::default()),
            output: Arc::clone(&output),
        });

        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::Tween, behaviour.clone());
        scope.adopt_node(node);
        runtime.register_follower(node, behaviour.clone());
        runtime.update(node, true)?;

        Ok(Self {
            node,
            runtime,
            output,
            follower: behaviour,
        })
    }

    /// Get the node backing this tween.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the current position without recording a dependency.
    pub fn get(&self) -> Result<T, ReactiveError> {
        peek(self)
    }

    /// Whether the tween is still moving towards its goal.
    pub fn is_playing(&self) -> bool {
        self.runtime.is_alive(self.node) && self.follower.is_moving()
    }
}

impl<T> Clone for Tween<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            runtime: self.runtime.clone(),
            output: Arc::clone(&self.output),
            follower: Arc::clone(&self.follower),
        }
    }
}

impl<T: Animatable> StateObject<T> for Tween<T> {
    fn node(&self) -> NodeId {
        self.node
    }

    fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Tween
    }

    fn snapshot(&self) -> Option<T> {
        self.output.read().clone()
    }
}

impl<T: Animatable> From<&Tween<T>> for UsedAs<T> {
    fn from(tween: &Tween<T>) -> Self {
        UsedAs::State(Arc::new(tween.clone()))
    }
}

impl<T: fmt::Debug> fmt::Debug for Tween<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tween")
            .field("node", &self.node)
            .field("value", &*self.output.read())
            .finish()
    }
}
