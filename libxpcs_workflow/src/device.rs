use fxhash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::channel::{Channel, ChannelBinding, ChannelValue};
use super::error::{ChannelError, DeviceError};

/// Interval between connection checks while waiting for a device
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A catalog binding together with the live channel it resolved to
#[derive(Clone)]
pub struct BoundChannel {
    pub binding: ChannelBinding,
    pub channel: Arc<dyn Channel>,
}

/// CompositeDevice groups bound channels into one piece of hardware.
///
/// Nested components are flattened: a channel `acquire` of component `cam` is
/// addressed as `cam.acquire`. Cloning is cheap; clones share the live channels.
#[derive(Clone)]
pub struct CompositeDevice {
    name: String,
    labels: Vec<String>,
    channels: FxHashMap<String, BoundChannel>,
    order: Vec<String>,
}

impl std::fmt::Debug for CompositeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeDevice")
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("channels", &self.order)
            .finish()
    }
}

impl CompositeDevice {
    pub fn new(name: &str, labels: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            labels,
            channels: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    /// Add a bound channel under a dotted path. Returns false if the path is taken.
    pub fn insert(&mut self, path: &str, bound: BoundChannel) -> bool {
        if self.channels.contains_key(path) {
            return false;
        }
        self.order.push(path.to_string());
        self.channels.insert(path.to_string(), bound);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Channel paths in declaration order
    pub fn paths(&self) -> &[String] {
        &self.order
    }

    pub fn binding(&self, path: &str) -> Option<&ChannelBinding> {
        self.channels.get(path).map(|bound| &bound.binding)
    }

    pub fn channel(&self, path: &str) -> Result<&Arc<dyn Channel>, DeviceError> {
        self.channels
            .get(path)
            .map(|bound| &bound.channel)
            .ok_or_else(|| DeviceError::UnknownChannel(self.name.clone(), path.to_string()))
    }

    pub fn get(&self, path: &str) -> Result<ChannelValue, DeviceError> {
        Ok(self.channel(path)?.get()?)
    }

    /// Write a value, refusing channels the catalog declared read-only
    pub fn put(&self, path: &str, value: ChannelValue) -> Result<(), DeviceError> {
        let bound = self
            .channels
            .get(path)
            .ok_or_else(|| DeviceError::UnknownChannel(self.name.clone(), path.to_string()))?;
        if !bound.binding.is_settable() {
            return Err(ChannelError::ReadOnly(bound.binding.read_address.clone()).into());
        }
        Ok(bound.channel.put(value)?)
    }

    /// Read every channel of the device
    pub fn read(&self) -> Result<BTreeMap<String, ChannelValue>, DeviceError> {
        let mut values = BTreeMap::new();
        for path in self.order.iter() {
            values.insert(path.clone(), self.get(path)?);
        }
        Ok(values)
    }

    /// Addresses of the channels that are not connected right now
    pub fn unconnected(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|path| self.channels.get(path))
            .filter(|bound| !bound.channel.is_connected())
            .map(|bound| bound.binding.read_address.clone())
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.unconnected().is_empty()
    }

    /// Poll until every channel is connected or the timeout expires.
    ///
    /// A timeout is fatal for the device; the caller is expected to report it and
    /// not retry.
    pub fn wait_for_connection(&self, timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let missing = self.unconnected();
            if missing.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                spdlog::error!(
                    "{timeout:?} timeout expired waiting for {} to connect",
                    self.name
                );
                return Err(DeviceError::ConnectionTimeout {
                    device: self.name.clone(),
                    timeout,
                    missing,
                });
            }
            std::thread::sleep(CONNECT_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ValueType;
    use crate::soft::SoftClient;

    fn bind(client: &SoftClient, read: &str, write: Option<&str>) -> BoundChannel {
        BoundChannel {
            binding: ChannelBinding {
                read_address: read.to_string(),
                write_address: write.map(|w| w.to_string()),
                value_type: ValueType::Number,
            },
            channel: client.channel(read, ValueType::Number),
        }
    }

    #[test]
    fn test_put_read_only() {
        let client = SoftClient::new();
        let mut device = CompositeDevice::new("immout", vec![]);
        device.insert("num_captured", bind(&client, "IMMout:NumCaptured_RBV", None));
        assert!(device.put("num_captured", 3.0.into()).is_err());
        assert!(matches!(
            device.get("missing"),
            Err(DeviceError::UnknownChannel(_, _))
        ));
    }

    #[test]
    fn test_connection_timeout_names_missing() {
        let client = SoftClient::new();
        let mut device = CompositeDevice::new("scaler1", vec![]);
        device.insert("count", bind(&client, "8idi:scaler1.CNT", Some("8idi:scaler1.CNT")));
        device.insert("preset", bind(&client, "8idi:scaler1.TP", Some("8idi:scaler1.TP")));
        client
            .lookup("8idi:scaler1.TP")
            .unwrap()
            .set_connected(false);

        match device.wait_for_connection(Duration::from_millis(300)) {
            Err(DeviceError::ConnectionTimeout { missing, .. }) => {
                assert_eq!(missing, vec![String::from("8idi:scaler1.TP")])
            }
            _ => panic!(),
        }
    }
}
