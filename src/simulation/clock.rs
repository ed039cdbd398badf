use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

// Fixed-point Q32.32 for speed scaling. 1.0 == 1<<32
const ONE_Q32: u64 = 1u64 << 32;
const NANOS_PER_SEC: u128 = 1_000_000_000;

#[derive(Debug)]
struct ScaledState {
    origin_real: Instant,      // host reference time
    origin_virtual_nanos: u64, // simulated time at origin_real
    scale_q32: u64,            // e.g., 0.5 = 0.5 * ONE_Q32
    last_set_percent: u32,     // exact percent requested by caller (avoids FP truncation off-by-one)
}

/// Simulated clock running at an adjustable multiple of wall-clock time.
///
/// Mobility windows (`init_time`, `final_time`, per-node start/end) are
/// measured on this clock, so a scene can be replayed faster or slower than
/// real time without changing its timing.
#[derive(Debug)]
pub struct SimulationClock {
    state: Mutex<ScaledState>,
}

impl SimulationClock {
    pub fn new(speed_percent: u32) -> Self {
        let percent = clamp_percent(speed_percent);
        Self {
            state: Mutex::new(ScaledState {
                origin_real: Instant::now(),
                origin_virtual_nanos: 0,
                scale_q32: scale_for(percent),
                last_set_percent: percent,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ScaledState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_real_to_virtual(&self, real: Instant) -> u64 {
        let state = self.state();
        let real_dt = real.saturating_duration_since(state.origin_real).as_nanos();
        let scaled = real_dt * state.scale_q32 as u128 / ONE_Q32 as u128;
        state.origin_virtual_nanos.saturating_add(scaled.min(u64::MAX as u128) as u64)
    }

    fn map_virtual_to_real(&self, virtual_nanos: u64) -> Instant {
        let state = self.state();
        // Targets behind the origin are due now.
        let Some(virt_dt) = virtual_nanos.checked_sub(state.origin_virtual_nanos) else {
            return state.origin_real;
        };
        let real_ns = virt_dt as u128 * ONE_Q32 as u128 / state.scale_q32 as u128;
        state.origin_real + Duration::from_nanos(real_ns.min(u64::MAX as u128) as u64)
    }

    /// Simulated time elapsed since the clock was created or last restarted.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.map_real_to_virtual(Instant::now()))
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Wall-clock instant at which the simulated clock reads `virtual_secs`.
    pub fn real_instant_at(&self, virtual_secs: f64) -> Instant {
        let nanos = (virtual_secs.max(0.0) * NANOS_PER_SEC as f64).min(u64::MAX as f64) as u64;
        self.map_virtual_to_real(nanos)
    }

    /// Reset simulated time to zero, keeping the current speed.
    pub fn restart(&self) {
        let mut state = self.state();
        state.origin_real = Instant::now();
        state.origin_virtual_nanos = 0;
    }

    /// Change the speed without a jump in simulated time.
    pub fn set_speed_percent(&self, percent: u32) {
        let percent = clamp_percent(percent);
        if self.speed_percent() == percent {
            return;
        }
        let real_now = Instant::now();
        // Virtual 'now' under the old mapping
        let virtual_now = self.map_real_to_virtual(real_now);
        let new_scale_q32 = scale_for(percent);

        let mut state = self.state();
        // Only origin_real moves, so deadlines already computed in simulated
        // time never fall behind the origin.
        let delta_v = virtual_now.saturating_sub(state.origin_virtual_nanos) as u128;
        let real_elapsed_ns = delta_v * ONE_Q32 as u128 / new_scale_q32 as u128;
        let dur = Duration::from_nanos(real_elapsed_ns.min(u64::MAX as u128) as u64);
        state.origin_real = real_now.checked_sub(dur).unwrap_or(real_now);
        state.scale_q32 = new_scale_q32;
        state.last_set_percent = percent;
        log::info!("Simulation speed set to {}%", percent);
    }

    pub fn speed_percent(&self) -> u32 {
        self.state().last_set_percent
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new(100)
    }
}

fn clamp_percent(percent: u32) -> u32 {
    percent.clamp(1, 1000)
}

fn scale_for(percent: u32) -> u64 {
    (percent as u128 * ONE_Q32 as u128 / 100) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuity_on_speed_change_preserves_mapping() {
        let clock = SimulationClock::new(100);
        let anchor = Instant::now();
        let v_before = clock.map_real_to_virtual(anchor);
        clock.set_speed_percent(400);
        let v_after = clock.map_real_to_virtual(anchor);
        // Tolerance covers the gap between the anchor and the rebase.
        let diff = v_after.abs_diff(v_before);
        assert!(diff <= 10_000_000, "virtual mapping changed too much on speed change: diff={} ns", diff);
        assert_eq!(clock.speed_percent(), 400);
    }

    #[test]
    fn virtual_to_real_scales_inverse_with_speed() {
        let clock = SimulationClock::new(200);
        let now_r = Instant::now();
        let now_v = clock.map_real_to_virtual(now_r);
        let target_r = clock.map_virtual_to_real(now_v + 200_000_000);
        let real_dt = target_r.duration_since(now_r);
        let diff = (real_dt.as_secs_f64() - 0.1).abs();
        assert!(diff < 0.01, "expected ~0.1s, got {:?}", real_dt);
    }

    #[test]
    fn past_targets_are_due_at_origin() {
        let clock = SimulationClock::new(100);
        clock.set_speed_percent(50);
        let origin_r = clock.state().origin_real;
        let origin_v = clock.state().origin_virtual_nanos;
        let r = clock.map_virtual_to_real(origin_v.saturating_sub(1));
        assert!(r.saturating_duration_since(origin_r) < Duration::from_millis(1));
    }

    #[test]
    fn speed_is_clamped() {
        let clock = SimulationClock::new(0);
        assert_eq!(clock.speed_percent(), 1);
        clock.set_speed_percent(5000);
        assert_eq!(clock.speed_percent(), 1000);
    }

    #[test]
    fn restart_rewinds_to_zero() {
        let clock = SimulationClock::new(1000);
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.elapsed_secs() >= 0.1);
        clock.restart();
        assert!(clock.elapsed_secs() < 0.1);
    }
}
