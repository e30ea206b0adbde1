//! The emulated HTS221 humidity/temperature sensor.
//!
//! [`HumidityServer`] owns the shared register file and is its only writer.
//! With noise simulation off, every set of a live reading is published
//! straight away. With it on, a background thread republishes perturbed and
//! smoothed readings every period, and sets take effect on the next tick.

use crate::models::registers::RegisterBlock;
use crate::storage::{SharedRegion, StorageError};
use crate::utils::file::{read_register_file, register_file_path};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod noise;

use noise::{LiveValues, NoiseTask, RegisterWriter, DEFAULT_PERIOD};

pub const DEFAULT_HUMIDITY: f64 = 45.0;
pub const DEFAULT_TEMPERATURE: f64 = 20.0;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("humidity server is closed")]
    Closed,

    #[error("noise simulation thread panicked")]
    WorkerPanicked,

    #[error("failed to start noise simulation thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("{quantity} must be a finite number, got {value}")]
    InvalidReading { quantity: &'static str, value: f64 },
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub simulate_noise: bool,
    pub period: Duration,
    pub seed: Option<u64>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            simulate_noise: true,
            period: DEFAULT_PERIOD,
            seed: None,
        }
    }
}

enum Writer {
    Idle(RegisterWriter),
    Simulating(NoiseTask),
    Closed,
}

pub struct HumidityServer {
    path: PathBuf,
    live: Arc<LiveValues>,
    period: Duration,
    writer: Writer,
}

impl HumidityServer {
    /// Open the server on the default register file.
    pub fn new(options: ServerOptions) -> Result<Self, ServerError> {
        Self::open(register_file_path(), options)
    }

    /// Open the server on the register file at `path`.
    ///
    /// A block that doesn't identify as an HTS221 is reset to the default
    /// calibration with 45 %rH and 20 °C. Otherwise the live readings are
    /// recovered from `H_OUT` and `T_OUT`. Either way the readings are then
    /// published once without noise before `options.simulate_noise` is
    /// applied.
    pub fn open<P: AsRef<Path>>(path: P, options: ServerOptions) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        let mut region = SharedRegion::open(&path)?;

        let block = region.read()?;
        let (humidity, temperature) = if block.is_initialised() {
            debug!("Recovered register block {:?}", block);
            (block.humidity(), block.temperature())
        } else {
            warn!(
                "Register file {} has sensor type {}, initialising defaults",
                path.display(),
                block.sensor_type
            );
            region.write(&RegisterBlock::default())?;
            (DEFAULT_HUMIDITY, DEFAULT_TEMPERATURE)
        };

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut writer = RegisterWriter::new(region, rng);
        writer.write_exact(humidity, temperature)?;

        info!(
            "Humidity server open on {} ({:.2} %rH, {:.2} °C)",
            path.display(),
            humidity,
            temperature
        );

        let mut server = Self {
            path,
            live: Arc::new(LiveValues::new(humidity, temperature)),
            period: options.period,
            writer: Writer::Idle(writer),
        };
        server.set_simulate_noise(options.simulate_noise)?;
        Ok(server)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.writer, Writer::Closed)
    }

    pub fn humidity(&self) -> Result<f64, ServerError> {
        self.ensure_open()?;
        Ok(self.live.humidity())
    }

    /// Set the live humidity (%rH). When noise simulation is off the register
    /// file reflects the new value once this returns. NaN and infinities are
    /// rejected and leave the live value unchanged.
    pub fn set_humidity(&mut self, value: f64) -> Result<(), ServerError> {
        self.ensure_open()?;
        ensure_finite("humidity", value)?;
        self.live.set_humidity(value);
        self.publish_if_idle()
    }

    pub fn temperature(&self) -> Result<f64, ServerError> {
        self.ensure_open()?;
        Ok(self.live.temperature())
    }

    /// Set the live temperature (°C). When noise simulation is off the
    /// register file reflects the new value once this returns. NaN and
    /// infinities are rejected and leave the live value unchanged.
    pub fn set_temperature(&mut self, value: f64) -> Result<(), ServerError> {
        self.ensure_open()?;
        ensure_finite("temperature", value)?;
        self.live.set_temperature(value);
        self.publish_if_idle()
    }

    pub fn simulate_noise(&self) -> bool {
        matches!(self.writer, Writer::Simulating(_))
    }

    /// Start or stop noise simulation. Starting returns immediately.
    /// Stopping blocks until the background thread has exited, then publishes
    /// the live readings once without noise. Setting the current value does
    /// nothing.
    pub fn set_simulate_noise(&mut self, enabled: bool) -> Result<(), ServerError> {
        match (enabled, mem::replace(&mut self.writer, Writer::Closed)) {
            (_, Writer::Closed) => Err(ServerError::Closed),
            (true, Writer::Idle(writer)) => {
                let task = NoiseTask::spawn(writer, Arc::clone(&self.live), self.period)
                    .map_err(ServerError::Spawn)?;
                self.writer = Writer::Simulating(task);
                Ok(())
            }
            (false, Writer::Simulating(task)) => {
                let mut writer = task.stop().map_err(|_| ServerError::WorkerPanicked)?;
                let result = writer.write_exact(self.live.humidity(), self.live.temperature());
                self.writer = Writer::Idle(writer);
                Ok(result?)
            }
            (_, current) => {
                self.writer = current;
                Ok(())
            }
        }
    }

    /// The register block as currently published.
    pub fn registers(&self) -> Result<RegisterBlock, ServerError> {
        match &self.writer {
            Writer::Closed => Err(ServerError::Closed),
            Writer::Idle(writer) => Ok(writer.region().read()?),
            // The mapping belongs to the noise thread; read like any other
            // process on the board.
            Writer::Simulating(_) => read_register_file(&self.path).map_err(|source| {
                ServerError::from(StorageError::Read {
                    path: self.path.clone(),
                    source,
                })
            }),
        }
    }

    /// Stop noise simulation if it is running, then unmap and close the
    /// register file. Closing a closed server does nothing.
    pub fn close(&mut self) -> Result<(), ServerError> {
        let result = match mem::replace(&mut self.writer, Writer::Closed) {
            Writer::Closed => return Ok(()),
            Writer::Idle(writer) => {
                writer.close();
                Ok(())
            }
            Writer::Simulating(task) => {
                let mut writer = task.stop().map_err(|_| ServerError::WorkerPanicked)?;
                let result = writer.write_exact(self.live.humidity(), self.live.temperature());
                writer.close();
                result.map_err(ServerError::from)
            }
        };
        info!("Humidity server on {} closed", self.path.display());
        result
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }
        Ok(())
    }

    fn publish_if_idle(&mut self) -> Result<(), ServerError> {
        if let Writer::Idle(writer) = &mut self.writer {
            writer.write_exact(self.live.humidity(), self.live.temperature())?;
        }
        Ok(())
    }
}

fn ensure_finite(quantity: &'static str, value: f64) -> Result<(), ServerError> {
    if !value.is_finite() {
        return Err(ServerError::InvalidReading { quantity, value });
    }
    Ok(())
}

impl Drop for HumidityServer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close humidity server: {}", e);
        }
    }
}
