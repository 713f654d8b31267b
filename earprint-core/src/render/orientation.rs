//! Head orientation: lock-free shared state and inverse-distance weighting.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Orientation {
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    pub fn is_finite(&self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }
}

/// The orientation a BRIR was measured at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrientationKey {
    /// Yaw only; distances wrap around 360 degrees.
    Yaw(f32),
    /// Full yaw/pitch/roll; plain Euclidean distance, no wrapping.
    Euler { yaw: f32, pitch: f32, roll: f32 },
}

impl OrientationKey {
    pub fn is_yaw_only(&self) -> bool {
        matches!(self, Self::Yaw(_))
    }

    pub fn distance(&self, orientation: &Orientation) -> f32 {
        match *self {
            Self::Yaw(yaw) => wrapped_yaw_distance(yaw, orientation.yaw),
            Self::Euler { yaw, pitch, roll } => {
                let dy = yaw - orientation.yaw;
                let dp = pitch - orientation.pitch;
                let dr = roll - orientation.roll;
                (dy * dy + dp * dp + dr * dr).sqrt()
            }
        }
    }
}

/// Shortest angular distance between two yaw angles, in `[0, 180]`.
pub fn wrapped_yaw_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs().rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Fills `weights` with normalized inverse-distance weights of `keys`.
///
/// A key at exactly zero distance takes all the weight.
pub fn inverse_distance_weights(keys: &[OrientationKey], orientation: &Orientation, weights: &mut [f32]) {
    debug_assert_eq!(keys.len(), weights.len());
    if keys.len() == 1 {
        weights[0] = 1.0;
        return;
    }

    let mut exact = None;
    let mut total = 0.0f32;
    for (i, (key, w)) in keys.iter().zip(weights.iter_mut()).enumerate() {
        let d = key.distance(orientation);
        if d == 0.0 {
            exact = Some(i);
            break;
        }
        *w = 1.0 / d;
        total += *w;
    }

    if let Some(hit) = exact {
        for (i, w) in weights.iter_mut().enumerate() {
            *w = if i == hit { 1.0 } else { 0.0 };
        }
        return;
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
}

#[derive(Debug, Default)]
struct SharedOrientation {
    yaw: AtomicU32,
    pitch: AtomicU32,
    roll: AtomicU32,
}

/// Cloneable handle to the current head orientation.
///
/// Writes and reads never block. The three angles are stored independently,
/// so a reader racing a writer may see a mix of old and new values for one
/// block.
#[derive(Debug, Clone, Default)]
pub struct OrientationHandle {
    inner: Arc<SharedOrientation>,
}

impl OrientationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new orientation. Readings with a NaN or infinite angle
    /// are dropped and the previous orientation stays in effect.
    pub fn set(&self, orientation: Orientation) -> bool {
        if !orientation.is_finite() {
            return false;
        }
        self.inner.yaw.store(orientation.yaw.to_bits(), Ordering::Relaxed);
        self.inner.pitch.store(orientation.pitch.to_bits(), Ordering::Relaxed);
        self.inner.roll.store(orientation.roll.to_bits(), Ordering::Relaxed);
        true
    }

    pub fn get(&self) -> Orientation {
        Orientation {
            yaw: f32::from_bits(self.inner.yaw.load(Ordering::Relaxed)),
            pitch: f32::from_bits(self.inner.pitch.load(Ordering::Relaxed)),
            roll: f32::from_bits(self.inner.roll.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn yaw_distance_wraps() {
        assert_abs_diff_eq!(wrapped_yaw_distance(350.0, 0.0), 10.0);
        assert_abs_diff_eq!(wrapped_yaw_distance(0.0, 350.0), 10.0);
        assert_abs_diff_eq!(wrapped_yaw_distance(90.0, -90.0), 180.0);
        assert_abs_diff_eq!(wrapped_yaw_distance(720.0, 0.0), 0.0);
    }

    #[test]
    fn euler_distance_does_not_wrap() {
        let key = OrientationKey::Euler { yaw: 350.0, pitch: 0.0, roll: 0.0 };
        assert_abs_diff_eq!(key.distance(&Orientation::default()), 350.0);
    }

    #[test]
    fn weights_are_inverse_distance_and_sum_to_one() {
        let keys = [OrientationKey::Yaw(0.0), OrientationKey::Yaw(90.0)];
        let mut w = [0.0; 2];
        inverse_distance_weights(&keys, &Orientation::new(350.0, 0.0, 0.0), &mut w);
        assert_abs_diff_eq!(w[0], 10.0 / 11.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 1.0 / 11.0, epsilon = 1e-6);
    }

    #[test]
    fn exact_match_takes_all_weight() {
        let keys = [OrientationKey::Yaw(0.0), OrientationKey::Yaw(90.0), OrientationKey::Yaw(180.0)];
        let mut w = [0.3; 3];
        inverse_distance_weights(&keys, &Orientation::new(90.0, 0.0, 0.0), &mut w);
        assert_eq!(w, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn handle_is_shared_between_clones() {
        let handle = OrientationHandle::new();
        let reader = handle.clone();
        handle.set(Orientation::new(12.5, -3.0, 1.0));
        assert_eq!(reader.get(), Orientation::new(12.5, -3.0, 1.0));
    }

    #[test]
    fn non_finite_readings_are_dropped() {
        let handle = OrientationHandle::new();
        assert!(handle.set(Orientation::new(45.0, 0.0, 0.0)));
        assert!(!handle.set(Orientation::new(f32::NAN, 0.0, 0.0)));
        assert!(!handle.set(Orientation::new(0.0, f32::INFINITY, 0.0)));
        assert_eq!(handle.get(), Orientation::new(45.0, 0.0, 0.0));
    }
}
