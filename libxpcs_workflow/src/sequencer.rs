use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use super::channel::{ChannelValue, SubscriptionId};
use super::device::CompositeDevice;
use super::error::{ConfigurationError, DeviceError};
use super::status::DeviceStatus;

/// A value written to arm the hardware right before the acquire channel is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmValue {
    pub path: String,
    pub value: ChannelValue,
}

/// How a detector is started and how its completion is observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// Channel that starts the acquisition
    pub acquire: String,
    pub start_value: ChannelValue,
    /// Written to the acquire channel when an acquisition is aborted
    #[serde(default)]
    pub stop_value: Option<ChannelValue>,
    /// Channel whose transition into `done_value` marks completion
    pub watch: String,
    pub done_value: ChannelValue,
    #[serde(default)]
    pub arm: Vec<ArmValue>,
}

/// Everything one acquisition cycle needs to know. Built right before triggering.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureDescriptor {
    pub file_path: String,
    pub file_name: String,
    pub num_images: u32,
    pub exposure_time: f64,
    pub exposure_period: f64,
    /// Submit an analysis job (true) or only a transfer job (false)
    pub submit_analysis: bool,
}

/// Ordered attribute -> value mapping applied by stage()
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageConfig {
    entries: Vec<(String, ChannelValue)>,
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing an earlier value for the same attribute
    pub fn set(mut self, path: &str, value: impl Into<ChannelValue>) -> Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(p, _)| p == path) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((path.to_string(), value)),
        }
        self
    }

    pub fn entries(&self) -> &[(String, ChannelValue)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Staging recipe for the area detectors used with the DM workflow (cam1 + IMMout)
pub fn dm_stage_config(descriptor: &ExposureDescriptor) -> StageConfig {
    StageConfig::new()
        .set("cam.num_images", descriptor.num_images)
        .set("cam.acquire_time", descriptor.exposure_time)
        .set("cam.acquire_period", descriptor.exposure_period)
        .set("immout.enable", 1.0)
        .set("immout.blocking_callbacks", 1.0)
        .set("cam.array_callbacks", 1.0)
        .set("immout.file_path", descriptor.file_path.as_str())
        .set("immout.file_name", descriptor.file_name.as_str())
        .set("immout.num_capture", descriptor.num_images)
        .set("immout.file_number", 1.0)
        .set("immout.file_format", "IMM_Cmprs")
        .set("immout.capture", 1.0)
}

/// AcquisitionSequencer drives one detector through stage, trigger and unstage.
///
/// trigger() never blocks: it hands back a DeviceStatus that a change-of-value
/// callback on the watch channel resolves. Callers that want synchronous behavior
/// wait on the status.
#[derive(Debug)]
pub struct AcquisitionSequencer {
    device: CompositeDevice,
    trigger: TriggerSpec,
    file_plugin: Option<String>,
    staged: Mutex<Option<Vec<(String, ChannelValue)>>>,
    in_flight: Mutex<Option<InFlight>>,
}

/// The status of the last trigger and the watch subscription that resolves it
#[derive(Debug)]
struct InFlight {
    status: DeviceStatus,
    subscription: SubscriptionId,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AcquisitionSequencer {
    /// Create the sequencer, waiting up to `timeout` for the device to connect.
    ///
    /// A device that does not connect in time cannot be used.
    pub fn new(
        device: CompositeDevice,
        trigger: TriggerSpec,
        file_plugin: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        device.channel(&trigger.acquire)?;
        device.channel(&trigger.watch)?;
        for arm in trigger.arm.iter() {
            device.channel(&arm.path)?;
        }
        if let Err(e) = device.wait_for_connection(timeout) {
            spdlog::error!("Could not connect detector {}: {e}", device.name());
            return Err(e);
        }
        spdlog::info!("Detector {} connected", device.name());
        Ok(Self {
            device,
            trigger,
            file_plugin,
            staged: Mutex::new(None),
            in_flight: Mutex::new(None),
        })
    }

    pub fn device(&self) -> &CompositeDevice {
        &self.device
    }

    pub fn is_staged(&self) -> bool {
        lock(&self.staged).is_some()
    }

    /// Check every entry against the device without touching any channel
    fn validate(&self, config: &StageConfig) -> Result<(), ConfigurationError> {
        for (key, value) in config.entries() {
            let binding =
                self.device
                    .binding(key)
                    .ok_or_else(|| ConfigurationError::UnknownAttribute {
                        device: self.device.name().to_string(),
                        key: key.clone(),
                    })?;
            if !binding.is_settable() {
                return Err(ConfigurationError::ReadOnlyAttribute {
                    device: self.device.name().to_string(),
                    key: key.clone(),
                });
            }
            if binding.value_type != value.value_type() {
                return Err(ConfigurationError::TypeMismatch {
                    device: self.device.name().to_string(),
                    key: key.clone(),
                    expected: binding.value_type,
                });
            }
        }
        Ok(())
    }

    /// Apply a configuration before acquisition, remembering the values it replaces.
    ///
    /// The whole configuration is validated first, so a bad key leaves every channel
    /// untouched. If a write fails part way, the writes already made are undone.
    pub fn stage(&self, config: &StageConfig) -> Result<(), DeviceError> {
        let mut staged = lock(&self.staged);
        if staged.is_some() {
            return Err(DeviceError::AlreadyStaged(self.device.name().to_string()));
        }
        self.validate(config)?;

        let mut restore: Vec<(String, ChannelValue)> = Vec::with_capacity(config.entries().len());
        for (key, value) in config.entries() {
            let applied = self
                .device
                .get(key)
                .and_then(|previous| {
                    self.device.put(key, value.clone())?;
                    Ok(previous)
                });
            match applied {
                Ok(previous) => restore.push((key.clone(), previous)),
                Err(e) => {
                    spdlog::error!("Staging {} failed at {key}: {e}", self.device.name());
                    restore_values(&self.device, restore);
                    return Err(e);
                }
            }
        }
        spdlog::debug!(
            "Staged {} with {} values",
            self.device.name(),
            restore.len()
        );
        *staged = Some(restore);
        Ok(())
    }

    /// Restore the values captured by stage(), last one first. No-op if not staged.
    pub fn unstage(&self) -> Result<(), DeviceError> {
        let Some(restore) = lock(&self.staged).take() else {
            return Ok(());
        };
        let mut first_error = None;
        for (key, value) in restore.into_iter().rev() {
            if let Err(e) = self.device.put(&key, value) {
                spdlog::error!("Unstaging {} failed at {key}: {e}", self.device.name());
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start an acquisition and return its completion status immediately.
    ///
    /// Fails fast if the status of the previous trigger has not resolved yet.
    pub fn trigger(&self) -> Result<DeviceStatus, DeviceError> {
        let mut in_flight = lock(&self.in_flight);
        let watch = self.device.channel(&self.trigger.watch)?.clone();
        if let Some(previous) = in_flight.as_ref() {
            if !previous.status.done() {
                return Err(DeviceError::ConcurrentTrigger(
                    self.device.name().to_string(),
                ));
            }
            watch.unsubscribe(previous.subscription);
        }

        let status = DeviceStatus::new(self.device.name());
        let slot: Arc<OnceLock<SubscriptionId>> = Arc::new(OnceLock::new());

        let cb_status = status.clone();
        let cb_slot = slot.clone();
        let cb_watch = Arc::downgrade(&watch);
        let done_value = self.trigger.done_value.clone();
        let id = watch.subscribe(Box::new(move |value, old_value| {
            if *value == done_value && old_value != value {
                cb_status.set_finished();
            }
            // Also drops the subscription of a status resolved elsewhere
            if cb_status.done() {
                if let (Some(id), Some(channel)) = (cb_slot.get(), cb_watch.upgrade()) {
                    channel.unsubscribe(*id);
                }
            }
        }))?;
        let _ = slot.set(id);
        // The callback may have fired before it could see its own id
        if status.done() {
            watch.unsubscribe(id);
        }

        let started = self
            .trigger
            .arm
            .iter()
            .try_for_each(|arm| self.device.put(&arm.path, arm.value.clone()))
            .and_then(|_| {
                self.device
                    .put(&self.trigger.acquire, self.trigger.start_value.clone())
            });
        if let Err(e) = started {
            watch.unsubscribe(id);
            status.set_exception(&e.to_string());
            return Err(e);
        }

        *in_flight = Some(InFlight {
            status: status.clone(),
            subscription: id,
        });
        Ok(status)
    }

    /// Give up on the acquisition in flight, failing its status with `reason` and
    /// dropping its watch subscription. The next trigger() is accepted again.
    ///
    /// Returns true if a pending status was failed by this call.
    pub fn abort(&self, reason: &str) -> bool {
        let Some(previous) = lock(&self.in_flight).take() else {
            return false;
        };
        match self.device.channel(&self.trigger.watch) {
            Ok(watch) => watch.unsubscribe(previous.subscription),
            Err(e) => spdlog::error!("Could not unsubscribe from {}: {e}", self.device.name()),
        }
        if let Some(stop) = &self.trigger.stop_value {
            if let Err(e) = self.device.put(&self.trigger.acquire, stop.clone()) {
                spdlog::error!("Could not stop acquisition on {}: {e}", self.device.name());
            }
        }
        let failed = previous.status.set_exception(reason);
        if failed {
            spdlog::warn!("Aborted acquisition on {}: {reason}", self.device.name());
        }
        failed
    }

    /// Base name of the file the detector's file plugin wrote, if it has one
    pub fn plugin_file_name(&self) -> Result<Option<String>, DeviceError> {
        let Some(plugin) = &self.file_plugin else {
            return Ok(None);
        };
        let full_name = self.device.get(&format!("{plugin}.full_file_name"))?;
        Ok(full_name.as_str().and_then(|name| {
            Path::new(name)
                .file_name()
                .map(|base| base.to_string_lossy().to_string())
        }))
    }
}

fn restore_values(device: &CompositeDevice, restore: Vec<(String, ChannelValue)>) {
    for (key, value) in restore.into_iter().rev() {
        if let Err(e) = device.put(&key, value) {
            spdlog::error!("Could not restore {key} on {}: {e}", device.name());
        }
    }
}
