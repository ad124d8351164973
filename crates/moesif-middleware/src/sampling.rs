//! Weighted random admission.

use crate::event::Event;
use rand::Rng;

/// Decide whether an event is kept at `percentage` (0..=100).
///
/// Admits iff a uniform draw from `[0, 100)` is below `percentage`, so 0
/// admits nothing and 100 admits everything. An admitted event gets its
/// weight set; a rejected one is left untouched.
pub fn admit(event: &mut Event, percentage: f64) -> bool {
    let percentage = clamp(percentage);
    let draw: f64 = rand::thread_rng().gen_range(0.0..100.0);
    if draw < percentage {
        event.weight = Some(weight(percentage));
        true
    } else {
        false
    }
}

/// Weight of an event admitted at `percentage`.
pub fn weight(percentage: f64) -> u32 {
    let percentage = clamp(percentage);
    if percentage <= 0.0 {
        1
    } else {
        (100.0 / percentage).floor() as u32
    }
}

fn clamp(percentage: f64) -> f64 {
    if percentage.is_nan() {
        return 100.0;
    }
    percentage.clamp(0.0, 100.0)
}
