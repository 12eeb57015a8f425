use std::time::{Duration, Instant};

use super::channel::ValueType;
use super::device::CompositeDevice;
use super::error::{ChannelError, DeviceError};

/// When a readback counts as settled at its target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlePolicy {
    /// Largest accepted distance from the target
    pub tolerance: f64,
    /// How long the readback must stay within tolerance
    pub settle_time: Duration,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            settle_time: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// One control loop of a temperature controller (`loop1.temperature`, `loop1.target`, ...)
#[derive(Debug, Clone)]
pub struct TemperatureLoop {
    device: CompositeDevice,
    name: String,
}

impl TemperatureLoop {
    pub fn new(device: CompositeDevice, name: &str) -> Result<Self, DeviceError> {
        let control = Self {
            device,
            name: name.to_string(),
        };
        control.device.channel(&control.path("temperature"))?;
        control.device.channel(&control.path("target"))?;
        Ok(control)
    }

    fn path(&self, attribute: &str) -> String {
        format!("{}.{attribute}", self.name)
    }

    fn number(&self, attribute: &str) -> Result<f64, DeviceError> {
        let path = self.path(attribute);
        let value = self.device.get(&path)?;
        value.as_f64().ok_or_else(|| {
            let address = self
                .device
                .binding(&path)
                .map(|b| b.read_address.clone())
                .unwrap_or(path);
            ChannelError::TypeMismatch {
                address,
                expected: ValueType::Number,
            }
            .into()
        })
    }

    pub fn temperature(&self) -> Result<f64, DeviceError> {
        self.number("temperature")
    }

    pub fn target(&self) -> Result<f64, DeviceError> {
        self.number("target")
    }

    pub fn set_target(&self, target: f64) -> Result<(), DeviceError> {
        spdlog::info!("Setting {}.{} target to {target}", self.device.name(), self.name);
        self.device.put(&self.path("target"), target.into())
    }

    /// Poll the readback until it has stayed within tolerance of the target for the
    /// settle time. Leaving the tolerance band restarts the settle time.
    pub fn wait_for_setpoint(&self, target: f64, policy: &SettlePolicy) -> Result<(), DeviceError> {
        let started = Instant::now();
        let mut in_band_since: Option<Instant> = None;
        loop {
            let now = Instant::now();
            if (self.temperature()? - target).abs() <= policy.tolerance {
                let since = *in_band_since.get_or_insert(now);
                if now.duration_since(since) >= policy.settle_time {
                    spdlog::info!(
                        "{}.{} settled at {target} after {:.1}s",
                        self.device.name(),
                        self.name,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
            } else {
                in_band_since = None;
            }
            if now.duration_since(started) >= policy.timeout {
                let address = self
                    .device
                    .binding(&self.path("temperature"))
                    .map(|b| b.read_address.clone())
                    .unwrap_or_default();
                spdlog::error!("{address} did not settle at {target}");
                return Err(DeviceError::SettleTimeout {
                    address,
                    target,
                    timeout: policy.timeout,
                });
            }
            std::thread::sleep(policy.poll_interval);
        }
    }

    /// Change the target and wait until the readback settles there
    pub fn set_and_wait(&self, target: f64, policy: &SettlePolicy) -> Result<(), DeviceError> {
        self.set_target(target)?;
        self.wait_for_setpoint(target, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;
    use crate::soft::SoftClient;

    fn fast_policy() -> SettlePolicy {
        SettlePolicy {
            tolerance: 0.5,
            settle_time: Duration::from_millis(40),
            timeout: Duration::from_millis(400),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn loop1(client: &SoftClient) -> TemperatureLoop {
        let catalog = DeviceCatalog::new(None).unwrap();
        TemperatureLoop::new(catalog.build("lakeshore", client).unwrap(), "loop1").unwrap()
    }

    #[test]
    fn test_settles_within_tolerance() {
        let client = SoftClient::new();
        let control = loop1(&client);
        client
            .lookup("8idi:LS336:TC4:IN1")
            .unwrap()
            .post(24.8.into())
            .unwrap();
        control.set_and_wait(25.0, &fast_policy()).unwrap();
        assert_eq!(control.target().unwrap(), 25.0);
    }

    #[test]
    fn test_settle_timeout() {
        let client = SoftClient::new();
        let control = loop1(&client);
        client
            .lookup("8idi:LS336:TC4:IN1")
            .unwrap()
            .post(20.0.into())
            .unwrap();
        match control.set_and_wait(25.0, &fast_policy()) {
            Err(DeviceError::SettleTimeout { address, .. }) => {
                assert_eq!(address, "8idi:LS336:TC4:IN1")
            }
            _ => panic!(),
        }
    }

    #[test]
    fn test_unknown_loop() {
        let client = SoftClient::new();
        let catalog = DeviceCatalog::new(None).unwrap();
        assert!(TemperatureLoop::new(catalog.build("lakeshore", &client).unwrap(), "loop3").is_err());
    }
}
