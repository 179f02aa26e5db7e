//! Deterministic synthetic EDA/ECG generator.
//!
//! Produces plausible signals for a scripted stress level: skin conductance
//! with stress-driven phasic responses on a drifting tonic level, and an ECG
//! with R-peaks whose rate rises and whose beat-to-beat variability falls as
//! stress increases. Generation is seeded, so a given configuration always
//! yields the same samples.

use crate::error::SensorError;
use crate::source::types::{Channel, RawSample, SessionClock, SignalSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stress level over time driving the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scenario {
    /// Fixed stress level
    Constant(f64),
    /// `from` until `start_s`, linear to `to` over `duration_s`, then `to`
    Ramp {
        from: f64,
        to: f64,
        start_s: f64,
        duration_s: f64,
    },
}

impl Scenario {
    pub fn stress_at(&self, t: f64) -> f64 {
        let stress = match *self {
            Scenario::Constant(level) => level,
            Scenario::Ramp {
                from,
                to,
                start_s,
                duration_s,
            } => {
                if t <= start_s {
                    from
                } else if duration_s <= 0.0 || t >= start_s + duration_s {
                    to
                } else {
                    from + (to - from) * (t - start_s) / duration_s
                }
            }
        };
        stress.clamp(0.0, 1.0)
    }
}

/// Generator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub sampling_rate_hz: f64,
    pub scenario: Scenario,
    /// Resting skin conductance (µS)
    pub eda_base: f64,
    /// Tonic rise at full stress (µS)
    pub eda_stress_gain: f64,
    /// Slow tonic drift (µS/s)
    pub eda_drift_per_s: f64,
    /// Uniform measurement noise amplitude (µS)
    pub eda_noise: f64,
    /// Phasic responses per second at zero and full stress
    pub scr_rate: (f64, f64),
    /// Peak phasic response amplitude at zero and full stress (µS)
    pub scr_amplitude: (f64, f64),
    pub resting_heart_rate: f64,
    /// Heart-rate rise at full stress (bpm)
    pub heart_rate_gain: f64,
    /// Beat-to-beat interval jitter at rest, as a fraction of the interval
    pub ibi_jitter: f64,
    /// Uniform ECG noise amplitude
    pub ecg_noise: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            sampling_rate_hz: 100.0,
            scenario: Scenario::Constant(0.1),
            eda_base: 2.0,
            eda_stress_gain: 0.5,
            eda_drift_per_s: 0.002,
            eda_noise: 0.005,
            scr_rate: (0.1, 0.6),
            scr_amplitude: (0.05, 0.4),
            resting_heart_rate: 70.0,
            heart_rate_gain: 30.0,
            ibi_jitter: 0.06,
            ecg_noise: 0.02,
        }
    }
}

impl SyntheticConfig {
    /// Perfectly flat signals: constant conductance and a metronomic heart.
    pub fn flat(eda: f64, heart_rate: f64) -> Self {
        Self {
            scenario: Scenario::Constant(0.0),
            eda_base: eda,
            eda_stress_gain: 0.0,
            eda_drift_per_s: 0.0,
            eda_noise: 0.0,
            scr_rate: (0.0, 0.0),
            scr_amplitude: (0.0, 0.0),
            resting_heart_rate: heart_rate,
            heart_rate_gain: 0.0,
            ibi_jitter: 0.0,
            ecg_noise: 0.0,
            ..Self::default()
        }
    }
}

const SCR_RISE_S: f64 = 0.75;
const SCR_DECAY_S: f64 = 4.0;
const SCR_LIFETIME_S: f64 = 20.0;
const R_WIDTH_S: f64 = 0.012;
const T_DELAY_S: f64 = 0.22;
const T_WIDTH_S: f64 = 0.04;
const T_AMPLITUDE: f64 = 0.15;

fn gaussian(x: f64, width: f64) -> f64 {
    (-(x / width).powi(2)).exp()
}

/// Bi-exponential skin conductance response shape, peaking at 1.0.
fn scr_shape(dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    let peak_t = (SCR_DECAY_S * SCR_RISE_S / (SCR_DECAY_S - SCR_RISE_S))
        * (SCR_DECAY_S / SCR_RISE_S).ln();
    let shape = |t: f64| (-t / SCR_DECAY_S).exp() - (-t / SCR_RISE_S).exp();
    shape(dt) / shape(peak_t)
}

#[derive(Debug, Clone)]
enum Generator {
    Eda {
        responses: Vec<(f64, f64)>,
    },
    Ecg {
        previous_beat: Option<f64>,
        next_beat: f64,
    },
}

/// One channel of synthetic signal.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    channel: Channel,
    config: SyntheticConfig,
    rng: StdRng,
    index: u64,
    generator: Generator,
    clock: Option<SessionClock>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(channel: Channel, config: SyntheticConfig) -> Self {
        let seed = match channel {
            Channel::Eda => config.seed,
            Channel::Ecg => config.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1),
        };
        let generator = match channel {
            Channel::Eda => Generator::Eda {
                responses: Vec::new(),
            },
            Channel::Ecg => Generator::Ecg {
                previous_beat: None,
                next_beat: 0.5,
            },
        };
        Self {
            channel,
            config,
            rng: StdRng::seed_from_u64(seed),
            index: 0,
            generator,
            clock: None,
            connected: true,
        }
    }

    /// EDA and ECG sources sharing one configuration.
    pub fn pair(config: &SyntheticConfig) -> (Self, Self) {
        (
            Self::new(Channel::Eda, config.clone()),
            Self::new(Channel::Ecg, config.clone()),
        )
    }

    /// Release samples in real time against `clock` instead of on demand.
    pub fn paced(mut self, clock: SessionClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Session time of the next sample.
    pub fn next_timestamp(&self) -> f64 {
        self.index as f64 / self.config.sampling_rate_hz
    }

    /// Simulate a dropped link; reads fail until [`SignalSource::reconnect`].
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Generate the next sample regardless of pacing.
    pub fn generate(&mut self) -> RawSample {
        let t = self.next_timestamp();
        self.index += 1;
        let stress = self.config.scenario.stress_at(t);
        let dt = 1.0 / self.config.sampling_rate_hz;
        let config = &self.config;
        let rng = &mut self.rng;

        let value = match &mut self.generator {
            Generator::Eda { responses } => {
                let rate = lerp(config.scr_rate, stress);
                if rate > 0.0 && rng.gen::<f64>() < rate * dt {
                    let amplitude = lerp(config.scr_amplitude, stress) * rng.gen_range(0.6..1.4);
                    responses.push((t, amplitude));
                }
                responses.retain(|(onset, _)| t - onset < SCR_LIFETIME_S);

                let phasic: f64 = responses
                    .iter()
                    .map(|(onset, amplitude)| amplitude * scr_shape(t - onset))
                    .sum();
                let noise = if config.eda_noise > 0.0 {
                    rng.gen_range(-1.0..1.0) * config.eda_noise
                } else {
                    0.0
                };
                config.eda_base
                    + config.eda_stress_gain * stress
                    + config.eda_drift_per_s * t
                    + phasic
                    + noise
            }
            Generator::Ecg {
                previous_beat,
                next_beat,
            } => {
                if t > *next_beat + 0.5 * T_DELAY_S {
                    let heart_rate = config.resting_heart_rate + config.heart_rate_gain * stress;
                    let jitter = config.ibi_jitter * (1.0 - 0.8 * stress);
                    let variation = if jitter > 0.0 {
                        rng.gen_range(-1.0..1.0) * jitter
                    } else {
                        0.0
                    };
                    let ibi = 60.0 / heart_rate * (1.0 + variation);
                    *previous_beat = Some(*next_beat);
                    *next_beat += ibi;
                }

                let beat = |b: f64| gaussian(t - b, R_WIDTH_S) + T_AMPLITUDE * gaussian(t - b - T_DELAY_S, T_WIDTH_S);
                let waveform = previous_beat.map_or(0.0, beat) + beat(*next_beat);
                let noise = if config.ecg_noise > 0.0 {
                    rng.gen_range(-1.0..1.0) * config.ecg_noise
                } else {
                    0.0
                };
                waveform + noise
            }
        };

        RawSample::new(self.channel, t, value)
    }
}

fn lerp((low, high): (f64, f64), stress: f64) -> f64 {
    low + (high - low) * stress
}

impl SignalSource for SyntheticSource {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn read(&mut self, timeout: Duration) -> Result<RawSample, SensorError> {
        if !self.connected {
            return Err(SensorError::disconnected(self.channel, "synthetic link down"));
        }
        if let Some(clock) = self.clock {
            let wait = self.next_timestamp() - clock.now();
            if wait > timeout.as_secs_f64() {
                std::thread::sleep(timeout);
                return Err(SensorError::Timeout {
                    channel: self.channel,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            if wait > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(wait));
            }
        }
        Ok(self.generate())
    }

    fn reconnect(&mut self) -> Result<(), SensorError> {
        self.connected = true;
        Ok(())
    }
}

/// Generate `seconds` of interleaved EDA/ECG samples, ordered by time.
pub fn record(config: &SyntheticConfig, seconds: f64) -> Vec<RawSample> {
    let (mut eda, mut ecg) = SyntheticSource::pair(config);
    let count = (seconds * config.sampling_rate_hz).round() as usize;
    let mut samples = Vec::with_capacity(count * 2);
    for _ in 0..count {
        samples.push(eda.generate());
        samples.push(ecg.generate());
    }
    samples
}
