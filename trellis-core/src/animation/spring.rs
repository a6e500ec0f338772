//! Spring Implementation
//!
//! A Spring follows a goal state with simulated damped-spring physics.
//! Unlike a tween it carries velocity, so retargeting mid-flight stays
//! smooth.
//!
//! # Physics
//!
//! Each component is an independent damped harmonic oscillator pulled
//! towards the goal:
//!
//! ```text
//! acceleration = w^2 * (goal - position) - 2 * damping * w * velocity
//! w            = speed * 2 * PI
//! ```
//!
//! `speed` is the undamped frequency in cycles per second. A damping ratio
//! of 1 is critically damped, below 1 bounces, above 1 is sluggish. The
//! simulation steps with semi-implicit Euler in fixed substeps and snaps to
//! the goal once position and velocity are both within the runtime's
//! settle threshold.

use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::animatable::{Animatable, Components};
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};
use crate::reactive::runtime::{Evaluate, Follow, Runtime};
use crate::reactive::{peek, Scope, StateObject, Use, UsedAs};

#[derive(Default)]
struct SpringState {
    position: Option<Components>,
    velocity: Components,
    goal: Components,
    moving: bool,

    /// Clock time not yet simulated.
    pending: f64,
}

impl SpringState {
    fn integrate(&mut self, seconds: f64, substep: f64, speed: f64, damping: f64) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        let w = speed.max(0.0) * TAU;
        let damping = damping.max(0.0);

        let mut remaining = seconds;
        while remaining > 0.0 {
            let h = remaining.min(substep);
            for ((x, v), goal) in position.iter_mut().zip(self.velocity.iter_mut()).zip(&self.goal) {
                let acceleration = w * w * (goal - *x) - 2.0 * damping * w * *v;
                *v += acceleration * h;
                *x += *v * h;
            }
            remaining -= h;
        }
    }

    fn settle(&mut self, epsilon: f64) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        let at_rest = position
            .iter()
            .zip(&self.goal)
            .all(|(x, goal)| (goal - x).abs() < epsilon)
            && self.velocity.iter().all(|v| v.abs() < epsilon);

        if at_rest {
            position.clone_from(&self.goal);
            self.velocity.iter_mut().for_each(|v| *v = 0.0);
            self.moving = false;
        }
    }
}

struct SpringNode<T> {
    goal: UsedAs<T>,
    speed: UsedAs<f64>,
    damping: UsedAs<f64>,
    state: Mutex<SpringState>,
    output: Arc<RwLock<Option<T>>>,
}

impl<T: Animatable> Evaluate for SpringNode<T> {
    fn evaluate(&self, cx: &Use) -> Result<bool, ReactiveError> {
        let goal = cx.resolve(&self.goal)?.to_components();
        let speed = cx.resolve(&self.speed)?;
        let damping = cx.resolve(&self.damping)?;
        let config = cx.runtime().config();

        let position = {
            let mut state = self.state.lock();
            if state.position.is_none() {
                state.velocity = std::iter::repeat(0.0).take(goal.len()).collect();
                state.position = Some(goal.clone());
            }
            if state.goal != goal {
                trace!(node = ?cx.evaluator(), "spring retargeted");
                state.goal = goal;
                state.moving = true;
            }

            let pending = std::mem::take(&mut state.pending);
            if state.moving && pending > 0.0 {
                state.integrate(pending, config.spring_substep, speed, damping);
            }
            state.settle(config.settle_epsilon);
            state.position.clone().unwrap_or_default()
        };

        let value = T::from_components(&position);
        let mut output = self.output.write();
        let changed = output.as_ref() != Some(&value);
        *output = Some(value);
        Ok(changed)
    }
}

impl<T: Animatable> Follow for SpringNode<T> {
    fn advance(&self, seconds: f64) {
        self.state.lock().pending += seconds;
    }

    fn is_moving(&self) -> bool {
        self.state.lock().moving
    }
}

/// Follows a goal state with spring physics.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let scope = runtime.scoped();
/// let target = scope.value(0.0f64);
/// let position = scope.spring(&target, 4.0, 1.0).unwrap();
///
/// target.set(1.0);
/// while runtime.tick(Duration::from_millis(16)) {}
/// assert_eq!(position.get().unwrap(), 1.0);
/// ```
pub struct Spring<T> {
    node: NodeId,
    runtime: Runtime,
    output: Arc<RwLock<Option<T>>>,
    behaviour: Arc<SpringNode<T>>,
}

impl<T: Animatable> Spring<T> {
    /// Create a spring in `scope`, at rest on the current goal.
    pub fn new(
        scope: &Scope,
        goal: impl Into<UsedAs<T>>,
        speed: impl Into<UsedAs<f64>>,
        damping: impl Into<UsedAs<f64>>,
    ) -> Result<Self, ReactiveError> {
        let output = Arc::new(RwLock::new(None));
        let behaviour = Arc::new(SpringNode {
            goal: goal.into(),
            speed: speed.into(),
            damping: damping.into(),
            state: Mutex::new(SpringState::default()),
            output: Arc::clone(&output),
        });

        let runtime = scope.runtime().clone();
        let node = runtime.insert_node(NodeKind::Spring, behaviour.clone());
        scope.adopt_node(node);
        runtime.register_follower(node, behaviour.clone());
        runtime.update(node, true)?;

        Ok(Self {
            node,
            runtime,
            output,
            behaviour,
        })
    }

    /// Get the node backing this spring.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Get the current position without recording a dependency.
    pub fn get(&self) -> Result<T, ReactiveError> {
        peek(self)
    }

    /// Get the current velocity.
    pub fn velocity(&self) -> T {
        T::from_components(&self.behaviour.state.lock().velocity)
    }

    /// Whether the spring is still moving.
    pub fn is_moving(&self) -> bool {
        self.runtime.is_alive(self.node) && self.behaviour.is_moving()
    }

    /// Teleport to `position`, keeping the current velocity.
    pub fn set_position(&self, position: T) {
        self.modify(|state| {
            state.position = Some(position.to_components());
        });
    }

    /// Replace the current velocity.
    pub fn set_velocity(&self, velocity: T) {
        self.modify(|state| {
            state.velocity = velocity.to_components();
        });
    }

    /// Add to the current velocity.
    pub fn add_velocity(&self, delta: T) {
        self.modify(|state| {
            for (v, dv) in state.velocity.iter_mut().zip(delta.to_components()) {
                *v += dv;
            }
        });
    }

    fn modify(&self, f: impl FnOnce(&mut SpringState)) {
        {
            let mut state = self.behaviour.state.lock();
            f(&mut *state);
            state.moving = true;
        }
        self.runtime.refresh(self.node);
    }
}

impl<T> Clone for Spring<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            runtime: self.runtime.clone(),
            output: Arc::clone(&self.output),
            behaviour: Arc::clone(&self.behaviour),
        }
    }
}

impl<T: Animatable> StateObject<T> for Spring<T> {
    fn node(&self) -> NodeId {
        self.node
    }

    fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Spring
    }

    fn snapshot(&self) -> Option<T> {
        self.output.read().clone()
    }
}

impl<T: Animatable> From<&Spring<T>> for UsedAs<T> {
    fn from(spring: &Spring<T>) -> Self {
        UsedAs::State(Arc::new(spring.clone()))
    }
}

impl<T: fmt::Debug> fmt::Debug for Spring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spring")
            .field("node", &self.node)
            .field("value", &*self.output.read())
            .finish()
    }
}
