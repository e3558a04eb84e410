//! First-order thermal model of a CPU cooled by a fan.
//!
//! `dT/dt = heat_load - (idle_cooling + fan_cooling * duty / 100) * (T - ambient)`
//!
//! The plant hands out a [`PlantSensor`] and a [`PlantFan`] that share its
//! state, so the control loop can drive it exactly like real hardware. Time
//! comes from whatever [`Clock`] the loop uses; with a [`ManualClock`] an
//! experiment runs without sleeping.
//!
//! [`ManualClock`]: crate::clock::ManualClock

use std::sync::{Arc, Mutex};

use crate::actuator::{clamp_duty, Actuator};
use crate::clock::Clock;
use crate::error::{ActuatorError, SensorError};
use crate::sensor::Sensor;

const MAX_STEP: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantParams {
    pub ambient: f64,
    /// Heating in °C/s with no cooling at all.
    pub heat_load: f64,
    /// Passive cooling coefficient, 1/s.
    pub idle_cooling: f64,
    /// Extra cooling at 100% duty, 1/s.
    pub fan_cooling: f64,
    pub initial_temperature: f64,
}

impl Default for PlantParams {
    // Settles near 100 °C with the fan off and 40 °C at full duty.
    fn default() -> Self {
        Self {
            ambient: 25.0,
            heat_load: 1.5,
            idle_cooling: 0.02,
            fan_cooling: 0.08,
            initial_temperature: 45.0,
        }
    }
}

impl PlantParams {
    /// Temperature the plant settles at for a constant duty.
    pub fn equilibrium(&self, duty: f64) -> f64 {
        let cooling = self.idle_cooling + self.fan_cooling * clamp_duty(duty) / 100.0;
        self.ambient + self.heat_load / cooling
    }
}

#[derive(Debug)]
struct PlantState {
    temperature: f64,
    duty: f64,
    time: Option<f64>,
    reads: u64,
    safe_state_engaged: bool,
}

#[derive(Clone)]
pub struct SimulatedPlant {
    params: PlantParams,
    clock: Arc<dyn Clock + Send + Sync>,
    state: Arc<Mutex<PlantState>>,
    fail_every: Option<u64>,
}

impl SimulatedPlant {
    pub fn new(params: PlantParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            params,
            clock,
            state: Arc::new(Mutex::new(PlantState {
                temperature: params.initial_temperature,
                duty: 0.0,
                time: None,
                reads: 0,
                safe_state_engaged: false,
            })),
            fail_every: None,
        }
    }

    /// Makes every `n`th sensor read fail.
    pub fn with_sensor_failures(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn params(&self) -> PlantParams {
        self.params
    }

    pub fn sensor(&self) -> PlantSensor {
        PlantSensor {
            plant: self.clone(),
        }
    }

    pub fn fan(&self) -> PlantFan {
        PlantFan {
            plant: self.clone(),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.with_state(|state| state.temperature)
    }

    pub fn duty(&self) -> f64 {
        self.with_state(|state| state.duty)
    }

    pub fn safe_state_engaged(&self) -> bool {
        self.with_state(|state| state.safe_state_engaged)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlantState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.advance(&mut state);
        f(&mut state)
    }

    // Integrates the model up to the clock's current time with the duty
    // that was in force since the last update.
    fn advance(&self, state: &mut PlantState) {
        let now = self.clock.now();
        let Some(last) = state.time.replace(now) else {
            return;
        };
        let mut remaining = now - last;
        let p = &self.params;
        while remaining > 0.0 {
            let dt = remaining.min(MAX_STEP);
            let cooling = p.idle_cooling + p.fan_cooling * state.duty / 100.0;
            state.temperature += (p.heat_load - cooling * (state.temperature - p.ambient)) * dt;
            remaining -= dt;
        }
    }
}

pub struct PlantSensor {
    plant: SimulatedPlant,
}

impl Sensor for PlantSensor {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        let fail_every = self.plant.fail_every;
        self.plant.with_state(|state| {
            state.reads += 1;
            match fail_every {
                Some(n) if state.reads % n == 0 => Err(SensorError::Unavailable {
                    what: format!("simulated failure on read {}", state.reads),
                }),
                _ => Ok(state.temperature),
            }
        })
    }
}

pub struct PlantFan {
    plant: SimulatedPlant,
}

impl Actuator for PlantFan {
    fn set_duty(&mut self, ratio: f64) -> Result<(), ActuatorError> {
        if !(0.0..=100.0).contains(&ratio) {
            return Err(ActuatorError::Rejected {
                duty: ratio,
                what: "outside 0..=100".to_string(),
            });
        }
        self.plant.with_state(|state| state.duty = ratio);
        Ok(())
    }

    fn set_safe_state(&mut self) -> Result<(), ActuatorError> {
        self.plant.with_state(|state| {
            state.duty = 0.0;
            state.safe_state_engaged = true;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn plant(clock: &ManualClock) -> SimulatedPlant {
        SimulatedPlant::new(PlantParams::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn heats_up_with_fan_off() {
        let clock = ManualClock::new(0.0);
        let plant = plant(&clock);
        let start = plant.temperature();
        clock.advance(10.0);
        assert!(plant.temperature() > start);
    }

    #[test]
    fn settles_at_equilibrium() {
        let clock = ManualClock::new(0.0);
        let plant = plant(&clock);
        let mut fan = plant.fan();
        fan.set_duty(100.0).unwrap();

        clock.advance(600.0);
        let expected = plant.params().equilibrium(100.0);
        assert!((plant.temperature() - expected).abs() < 0.1);
        assert!((expected - 40.0).abs() < 1e-9);
    }

    #[test]
    fn injected_failures_hit_every_nth_read() {
        let clock = ManualClock::new(0.0);
        let plant = plant(&clock).with_sensor_failures(3);
        let mut sensor = plant.sensor();

        let results: Vec<bool> = (0..6).map(|_| sensor.read_temperature().is_ok()).collect();
        assert_eq!(results, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn safe_state_turns_fan_off() {
        let clock = ManualClock::new(0.0);
        let plant = plant(&clock);
        let mut fan = plant.fan();
        fan.set_duty(80.0).unwrap();
        fan.set_safe_state().unwrap();
        assert_eq!(plant.duty(), 0.0);
        assert!(plant.safe_state_engaged());
    }
}
