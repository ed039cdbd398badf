//! Radio signal calculations.
//!
//! Contains helpers for:
//! - Path loss under the selectable propagation models (Friis free space,
//!   log-distance, two-ray ground reflection, ITU indoor)
//! - Received signal strength from a simple link budget
//! - Link quality indicator derived from RSSI
//! - Effective range estimation from a receiver sensitivity threshold
//!
//! Units:
//! - Power: dBm, gains in dBi, losses in dB
//! - Distance and antenna heights: meters
//! - Frequency: GHz

use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;

use super::types::Radio;

/// Speed of light in vacuum (m/s).
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Distances below this are evaluated at this value, avoiding the log(0)
/// singularity of every model.
pub const MIN_EVALUATION_DISTANCE: f64 = 0.1;

/// Antenna heights are clamped to at least this value so the two-ray
/// crossover distance stays positive.
const MIN_ANTENNA_HEIGHT: f64 = 0.01;

/// Upper bound for the range search (meters).
const MAX_RANGE_SEARCH: f64 = 100_000.0;

/// The ITU indoor model switches to this power loss coefficient beyond
/// `ITU_BREAKPOINT` meters.
const ITU_FAR_COEFFICIENT: f64 = 38.0;
const ITU_BREAKPOINT: f64 = 16.0;

fn default_system_loss() -> f64 {
    1.0
}

fn default_exponent() -> f64 {
    3.0
}

fn default_power_loss_coefficient() -> f64 {
    28.0
}

/// Distance → attenuation model used by the connectivity graph and the
/// handover policy.
///
/// Every model is deterministic and its RSSI is monotonically non-increasing
/// in distance for a fixed parameter set.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PropagationModel {
    /// Free-space path loss.
    Friis {
        /// System loss factor L (linear, ≥ 1).
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    /// Log-distance path loss anchored at a 1 m Friis reference.
    LogDistance {
        /// Path loss exponent n (2.0 free space, 2.7-3.5 urban, 3-5 indoor obstructed).
        #[serde(default = "default_exponent")]
        exponent: f64,
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    /// Two-ray ground reflection: Friis up to the crossover distance, fourth
    /// power law beyond it.
    TwoRayGround {
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    /// ITU-R P.1238 indoor model.
    ItuIndoor {
        /// Distance power loss coefficient N.
        #[serde(default = "default_power_loss_coefficient")]
        power_loss_coefficient: f64,
        /// Number of floors between the endpoints.
        #[serde(default)]
        floors: u32,
        /// Penetration loss per floor (dB).
        #[serde(default)]
        floor_penetration_loss: f64,
    },
}

impl Default for PropagationModel {
    fn default() -> Self {
        PropagationModel::LogDistance {
            exponent: default_exponent(),
            system_loss: default_system_loss(),
        }
    }
}

/// Link budget inputs for one transmitter → receiver direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParameters {
    pub tx_power: f64,
    pub tx_antenna_gain: f64,
    pub rx_antenna_gain: f64,
    pub tx_antenna_height: f64,
    pub rx_antenna_height: f64,
    /// Carrier frequency (GHz), taken from the receiver.
    pub frequency: f64,
}

impl SignalParameters {
    /// Budget for a signal sent by `tx` and heard by `rx`.
    pub fn between(tx: &Radio, rx: &Radio) -> Self {
        Self {
            tx_power: tx.tx_power,
            tx_antenna_gain: tx.antenna_gain,
            rx_antenna_gain: rx.antenna_gain,
            tx_antenna_height: tx.antenna_height,
            rx_antenna_height: rx.antenna_height,
            frequency: rx.frequency,
        }
    }

    /// Budget for a radio hearing an identical copy of itself. Used to derive
    /// a range from the radio's own parameters.
    pub fn symmetric(radio: &Radio) -> Self {
        Self::between(radio, radio)
    }

    fn gains(&self) -> f64 {
        self.tx_power + self.tx_antenna_gain + self.rx_antenna_gain
    }

    fn wavelength(&self) -> f64 {
        SPEED_OF_LIGHT / (self.frequency * 1e9)
    }
}

/// The only failure a propagation model reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropagationError {
    NegativeDistance(f64),
}

impl fmt::Display for PropagationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationError::NegativeDistance(d) => write!(f, "negative distance {d} m"),
        }
    }
}

impl std::error::Error for PropagationError {}

/// Free-space path loss (dB) including the system loss factor.
///
/// # Formula
///
/// ```text
/// PL(d) = 10 × log₁₀( (4πd)² × L / λ² )
/// ```
fn friis_path_loss(distance: f64, params: &SignalParameters, system_loss: f64) -> f64 {
    let lambda = params.wavelength();
    let numerator = (4.0 * PI * distance).powi(2) * system_loss;
    10.0 * (numerator / (lambda * lambda)).log10()
}

impl PropagationModel {
    /// Reject parameter sets under which RSSI would grow with distance or
    /// leave the finite range.
    pub fn validate(&self) -> Result<(), String> {
        fn check_system_loss(system_loss: f64) -> Result<(), String> {
            if !(system_loss.is_finite() && system_loss >= 1.0) {
                return Err(format!("Propagation system_loss {} must be finite and at least 1", system_loss));
            }
            Ok(())
        }

        match *self {
            PropagationModel::Friis { system_loss } | PropagationModel::TwoRayGround { system_loss } => check_system_loss(system_loss),
            PropagationModel::LogDistance { exponent, system_loss } => {
                if !(exponent.is_finite() && exponent > 0.0) {
                    return Err(format!("Propagation exponent {} must be positive", exponent));
                }
                check_system_loss(system_loss)
            }
            PropagationModel::ItuIndoor {
                power_loss_coefficient,
                floor_penetration_loss,
                ..
            } => {
                if !(power_loss_coefficient.is_finite() && power_loss_coefficient > 0.0) {
                    return Err(format!("Propagation power_loss_coefficient {} must be positive", power_loss_coefficient));
                }
                if !(floor_penetration_loss.is_finite() && floor_penetration_loss >= 0.0) {
                    return Err(format!("Propagation floor_penetration_loss {} dB must not be negative", floor_penetration_loss));
                }
                Ok(())
            }
        }
    }

    /// Path loss (dB) at `distance` meters.
    ///
    /// Distances below [`MIN_EVALUATION_DISTANCE`] are evaluated at that
    /// minimum; negative distances are rejected.
    pub fn path_loss(&self, distance: f64, params: &SignalParameters) -> Result<f64, PropagationError> {
        if distance < 0.0 || distance.is_nan() {
            return Err(PropagationError::NegativeDistance(distance));
        }
        let d = distance.max(MIN_EVALUATION_DISTANCE);

        let loss = match *self {
            PropagationModel::Friis { system_loss } => friis_path_loss(d, params, system_loss),
            PropagationModel::LogDistance { exponent, system_loss } => {
                // PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀), d₀ = 1 m
                let reference = friis_path_loss(1.0, params, system_loss);
                reference + 10.0 * exponent * d.log10()
            }
            PropagationModel::TwoRayGround { system_loss } => {
                let ht = params.tx_antenna_height.max(MIN_ANTENNA_HEIGHT);
                let hr = params.rx_antenna_height.max(MIN_ANTENNA_HEIGHT);
                // Crossover where the ground-reflected ray starts to dominate.
                let crossover = 4.0 * PI * ht * hr / params.wavelength();
                if d < crossover {
                    friis_path_loss(d, params, system_loss)
                } else {
                    // PL(d) = 40 log₁₀ d − 20 log₁₀ ht − 20 log₁₀ hr + 10 log₁₀ L
                    40.0 * d.log10() - 20.0 * ht.log10() - 20.0 * hr.log10() + 10.0 * system_loss.log10()
                }
            }
            PropagationModel::ItuIndoor {
                power_loss_coefficient,
                floors,
                floor_penetration_loss,
            } => {
                let coefficient = if d > ITU_BREAKPOINT {
                    power_loss_coefficient.max(ITU_FAR_COEFFICIENT)
                } else {
                    power_loss_coefficient
                };
                let frequency_mhz = params.frequency * 1000.0;
                20.0 * frequency_mhz.log10() + coefficient * d.log10() + floor_penetration_loss * floors as f64 - 28.0
            }
        };

        Ok(loss)
    }

    /// Received signal strength (dBm) at `distance` meters.
    ///
    /// Formula: RSSI = P_tx + G_tx + G_rx − PL(d)
    pub fn signal_strength(&self, distance: f64, params: &SignalParameters) -> Result<f64, PropagationError> {
        Ok(params.gains() - self.path_loss(distance, params)?)
    }

    /// Largest distance whose RSSI is still at or above `sensitivity` (dBm).
    ///
    /// Bisection over the monotone RSSI curve. Returns 0 when even the minimum
    /// evaluation distance is below sensitivity, and the search bound when the
    /// budget never drops below it.
    pub fn effective_range(&self, params: &SignalParameters, sensitivity: f64) -> f64 {
        let heard = |d: f64| self.signal_strength(d, params).map(|rssi| rssi >= sensitivity).unwrap_or(false);

        if !heard(MIN_EVALUATION_DISTANCE) {
            return 0.0;
        }

        let mut low = MIN_EVALUATION_DISTANCE;
        let mut high = 1.0_f64.max(low);
        while heard(high) {
            if high >= MAX_RANGE_SEARCH {
                return MAX_RANGE_SEARCH;
            }
            low = high;
            high = (high * 2.0).min(MAX_RANGE_SEARCH);
        }

        for _ in 0..64 {
            let mid = 0.5 * (low + high);
            if heard(mid) {
                low = mid;
            } else {
                high = mid;
            }
        }
        low
    }
}

/// Link quality indicator carried by topology quality directives.
///
/// `lqi = 100 + rssi`, truncated toward zero.
pub fn link_quality_indicator(rssi: f64) -> i32 {
    (100.0 + rssi) as i32
}
