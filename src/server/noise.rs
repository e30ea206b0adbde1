use crate::models::registers::{humidity_code, temperature_code};
use crate::storage::{SharedRegion, StorageError};
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(130);

// Window lengths approximate the HTS221's humidity and temperature response
// times at the default period.
pub const HUMIDITY_WINDOW: usize = 77;
pub const TEMPERATURE_WINDOW: usize = 31;

pub const NOISE_STDDEV: f64 = 0.2;

/// Error magnitude for a humidity reading (%rH).
pub fn humidity_error(humidity: f64) -> f64 {
    if (20.0..=80.0).contains(&humidity) {
        3.5
    } else {
        5.0
    }
}

/// Error magnitude for a temperature reading (°C).
pub fn temperature_error(temperature: f64) -> f64 {
    if (15.0..=40.0).contains(&temperature) {
        0.5
    } else if (0.0..=60.0).contains(&temperature) {
        1.0
    } else {
        2.0
    }
}

/// `value` plus a gaussian error scaled by `error`.
pub fn perturb<R: Rng>(rng: &mut R, value: f64, error: f64) -> f64 {
    let sample: f64 = rng.sample(StandardNormal);
    value + sample * NOISE_STDDEV * error
}

/// Live readings shared between the controlling thread and the noise thread.
#[derive(Debug)]
pub(crate) struct LiveValues {
    humidity: AtomicU64,
    temperature: AtomicU64,
}

impl LiveValues {
    pub fn new(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity: AtomicU64::new(humidity.to_bits()),
            temperature: AtomicU64::new(temperature.to_bits()),
        }
    }

    pub fn humidity(&self) -> f64 {
        f64::from_bits(self.humidity.load(Ordering::Relaxed))
    }

    pub fn temperature(&self) -> f64 {
        f64::from_bits(self.temperature.load(Ordering::Relaxed))
    }

    pub fn set_humidity(&self, value: f64) {
        self.humidity.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_temperature(&self, value: f64) {
        self.temperature.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Bounded FIFO of recent samples; its mean is the smoothed reading.
#[derive(Debug)]
pub(crate) struct Smoother {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Smoother {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `sample`, evicting the oldest once full, and return the mean.
    pub fn push(&mut self, sample: f64) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Smoothing state for one noise session. Created empty whenever simulation
/// starts and dropped when it stops.
#[derive(Debug)]
pub(crate) struct NoiseModel {
    humidity: Smoother,
    temperature: Smoother,
}

impl NoiseModel {
    pub fn new() -> Self {
        Self {
            humidity: Smoother::new(HUMIDITY_WINDOW),
            temperature: Smoother::new(TEMPERATURE_WINDOW),
        }
    }

    /// Perturb both readings, push them through their windows and return
    /// the smoothed `(humidity, temperature)`.
    pub fn sample<R: Rng>(&mut self, rng: &mut R, humidity: f64, temperature: f64) -> (f64, f64) {
        let h = perturb(rng, humidity, humidity_error(humidity));
        let t = perturb(rng, temperature, temperature_error(temperature));
        (self.humidity.push(h), self.temperature.push(t))
    }
}

/// Sole writer of the register outputs. Owns the mapping and the noise
/// generator; whoever holds it is the only one allowed to write.
pub(crate) struct RegisterWriter {
    region: SharedRegion,
    rng: StdRng,
}

impl RegisterWriter {
    pub fn new(region: SharedRegion, rng: StdRng) -> Self {
        Self { region, rng }
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Publish the readings as they are.
    pub fn write_exact(&mut self, humidity: f64, temperature: f64) -> Result<(), StorageError> {
        let (h_out, t_out) = (humidity_code(humidity), temperature_code(temperature));
        debug!("write_exact H_OUT={} T_OUT={}", h_out, t_out);
        self.region.write_outputs(h_out, t_out)
    }

    /// Publish perturbed, smoothed readings.
    pub fn write_noisy(
        &mut self,
        model: &mut NoiseModel,
        humidity: f64,
        temperature: f64,
    ) -> Result<(), StorageError> {
        let (h, t) = model.sample(&mut self.rng, humidity, temperature);
        self.region.write_outputs(humidity_code(h), temperature_code(t))
    }

    pub fn close(self) {
        self.region.close();
    }
}

/// Handle on the running noise thread.
pub(crate) struct NoiseTask {
    stop: Sender<()>,
    handle: JoinHandle<RegisterWriter>,
}

impl NoiseTask {
    /// Move `writer` onto a new thread that rewrites the outputs every
    /// `period` until stopped. If the thread can't be started the writer is
    /// dropped with it, which unmaps the region.
    pub fn spawn(writer: RegisterWriter, live: Arc<LiveValues>, period: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("hts221-noise".into())
            .spawn(move || {
                let mut writer = writer;
                let mut model = NoiseModel::new();
                let mut ticks: u64 = 0;
                let start = Instant::now();

                loop {
                    match stopped.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if let Err(e) = writer.write_noisy(&mut model, live.humidity(), live.temperature()) {
                        error!("Noise simulation stopped: {}", e);
                        break;
                    }
                    ticks += 1;
                }

                debug!(
                    "Noise loop ran {} ticks in {} ms",
                    ticks,
                    start.elapsed().as_millis()
                );
                writer
            })?;

        info!("Noise simulation started (period {} ms)", period.as_millis());
        Ok(Self { stop, handle })
    }

    /// Signal the thread and wait for it to exit, taking the writer back.
    pub fn stop(self) -> thread::Result<RegisterWriter> {
        // The loop may already have exited on a write failure.
        let _ = self.stop.send(());
        let writer = self.handle.join()?;
        info!("Noise simulation stopped");
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_humidity_error_bands() {
        assert_eq!(humidity_error(20.0), 3.5);
        assert_eq!(humidity_error(50.0), 3.5);
        assert_eq!(humidity_error(80.0), 3.5);
        assert_eq!(humidity_error(19.9), 5.0);
        assert_eq!(humidity_error(80.1), 5.0);
        assert_eq!(humidity_error(-3.0), 5.0);
    }

    #[test]
    fn test_temperature_error_bands() {
        assert_eq!(temperature_error(15.0), 0.5);
        assert_eq!(temperature_error(40.0), 0.5);
        assert_eq!(temperature_error(0.0), 1.0);
        assert_eq!(temperature_error(14.9), 1.0);
        assert_eq!(temperature_error(60.0), 1.0);
        assert_eq!(temperature_error(-0.1), 2.0);
        assert_eq!(temperature_error(60.1), 2.0);
        assert_eq!(temperature_error(-40.0), 2.0);
    }

    #[test]
    fn test_perturb_without_error_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(perturb(&mut rng, 42.5, 0.0), 42.5);
    }

    #[test]
    fn test_perturb_spread() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..2000).map(|_| perturb(&mut rng, 50.0, 3.5)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!((mean - 50.0).abs() < 0.1, "mean {}", mean);
        // stddev should be near 0.2 * 3.5
        assert!((var.sqrt() - 0.7).abs() < 0.1, "stddev {}", var.sqrt());
    }

    #[test]
    fn test_smoother_evicts_oldest() {
        let mut smoother = Smoother::new(3);
        assert_eq!(smoother.push(3.0), 3.0);
        assert_eq!(smoother.push(6.0), 4.5);
        assert_eq!(smoother.push(9.0), 6.0);
        assert_eq!(smoother.push(12.0), 9.0);
        assert_eq!(smoother.len(), 3);
    }

    #[test]
    fn test_noise_model_windows_are_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = NoiseModel::new();
        for _ in 0..200 {
            model.sample(&mut rng, 50.0, 25.0);
        }
        assert_eq!(model.humidity.len(), HUMIDITY_WINDOW);
        assert_eq!(model.temperature.len(), TEMPERATURE_WINDOW);
    }

    #[test]
    fn test_noise_model_is_reproducible_with_seed() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut model = NoiseModel::new();
            (0..50).map(|_| model.sample(&mut rng, 45.0, 20.0)).collect::<Vec<_>>()
        };
        assert_eq!(run(11), run(11));
        assert_ne!(run(11), run(12));
    }

    #[test]
    fn test_noise_model_tracks_input() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = NoiseModel::new();
        let mut last = (0.0, 0.0);
        for _ in 0..HUMIDITY_WINDOW {
            last = model.sample(&mut rng, 60.0, 30.0);
        }
        assert!((last.0 - 60.0).abs() < 1.0, "humidity {}", last.0);
        assert!((last.1 - 30.0).abs() < 1.0, "temperature {}", last.1);
    }

    #[test]
    fn test_live_values() {
        let live = LiveValues::new(45.0, 20.0);
        assert_eq!(live.humidity(), 45.0);
        assert_eq!(live.temperature(), 20.0);
        live.set_humidity(-1.25);
        live.set_temperature(99.5);
        assert_eq!(live.humidity(), -1.25);
        assert_eq!(live.temperature(), 99.5);
    }
}
