//! Followers
//!
//! Followers are eager state objects that chase a goal state over time,
//! driven by a clock the host owns.
//!
//! # Concepts
//!
//! ## Tween
//!
//! Moves to the goal along a fixed-length eased curve. Retargeting starts
//! a new curve from the current position.
//!
//! ## Spring
//!
//! Moves to the goal with damped-spring physics. Keeps its velocity when
//! retargeted, and can be pushed around directly with
//! [`Spring::set_position`], [`Spring::set_velocity`] and
//! [`Spring::add_velocity`].
//!
//! # Clock
//!
//! The graph core has no clock. The host forwards elapsed time with
//! [`Runtime::tick`](crate::Runtime::tick), either from its own frame loop
//! or by running [`animate`] on tokio. Each tick re-evaluates the followers
//! that are moving and propagates their new values before returning.

mod animatable;
mod clock;
mod easing;
mod spring;
mod tween;

pub use animatable::{Animatable, Components};
pub use clock::animate;
pub use easing::Easing;
pub use spring::Spring;
pub use tween::{Tween, TweenInfo};
