//! Types that followers can move between.
//!
//! A follower works on a flat list of `f64` components. Anything that can
//! be split into components and rebuilt from them can be tweened or sprung.

use smallvec::SmallVec;

use crate::reactive::UsedAs;

/// Component storage. Up to four components stay inline.
pub type Components = SmallVec<[f64; 4]>;

/// A value a follower can interpolate.
pub trait Animatable: Clone + PartialEq + Send + Sync + 'static {
    /// Split the value into components.
    fn to_components(&self) -> Components;

    /// Rebuild a value from components produced by `to_components`.
    fn from_components(components: &[f64]) -> Self;
}

impl Animatable for f64 {
    fn to_components(&self) -> Components {
        SmallVec::from_slice(&[*self])
    }

    fn from_components(components: &[f64]) -> Self {
        components.first().copied().unwrap_or_default()
    }
}

impl Animatable for f32 {
    fn to_components(&self) -> Components {
        SmallVec::from_slice(&[f64::from(*self)])
    }

    fn from_components(components: &[f64]) -> Self {
        components.first().copied().unwrap_or_default() as f32
    }
}

macro_rules! impl_animatable_array {
    ($($len:literal),*) => {
        $(
            impl Animatable for [f64; $len] {
                fn to_components(&self) -> Components {
                    SmallVec::from_slice(self)
                }

                fn from_components(components: &[f64]) -> Self {
                    let mut out = [0.0; $len];
                    for (slot, value) in out.iter_mut().zip(components) {
                        *slot = *value;
                    }
                    out
                }
            }

            impl From<[f64; $len]> for UsedAs<[f64; $len]> {
                fn from(value: [f64; $len]) -> Self {
                    UsedAs::Constant(value)
                }
            }
        )*
    };
}

impl_animatable_array!(2, 3, 4);

impl From<f64> for UsedAs<f64> {
    fn from(value: f64) -> Self {
        UsedAs::Constant(value)
    }
}

impl From<f32> for UsedAs<f32> {
    fn from(value: f32) -> Self {
        UsedAs::Constant(value)
    }
}

/// Linear interpolation between two component lists.
pub(crate) fn lerp(from: &[f64], to: &[f64], alpha: f64) -> Components {
    from.iter()
        .zip(to)
        .map(|(a, b)| a + (b - a) * alpha)
        .collect()
}
