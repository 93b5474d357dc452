use std::time::Duration;

use rand::Rng;

/// `base` stretched by up to half again, so replicas started together
/// do not all tick at once.
pub fn jittered(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let extra = rng.gen_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(extra)
}
