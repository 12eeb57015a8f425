//! In-memory control system.
//!
//! SoftClient hands out SoftChannels keyed by read address. A put on a soft channel
//! updates the value immediately (the readback mirrors the setpoint) and notifies every
//! subscriber. It backs the unit tests and the `simulate` command of the CLI.
use fxhash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::channel::{
    Channel, ChannelBinding, ChannelValue, ControlClient, MonitorCallback, SubscriptionId,
    ValueType,
};
use super::device::CompositeDevice;
use super::error::{ChannelError, DeviceError};
use super::sequencer::TriggerSpec;

type SharedCallback = Arc<dyn Fn(&ChannelValue, &ChannelValue) + Send + Sync>;

/// A single in-memory channel
pub struct SoftChannel {
    address: String,
    value_type: ValueType,
    value: Mutex<ChannelValue>,
    connected: AtomicBool,
    subscribers: Mutex<Vec<(SubscriptionId, SharedCallback)>>,
    next_id: AtomicU64,
}

impl SoftChannel {
    pub fn new(address: &str, value_type: ValueType) -> Self {
        Self {
            address: address.to_string(),
            value_type,
            value: Mutex::new(ChannelValue::zero(value_type)),
            connected: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Publish a new value as the control system would, regardless of write access
    pub fn post(&self, value: ChannelValue) -> Result<(), ChannelError> {
        if value.value_type() != self.value_type {
            return Err(ChannelError::TypeMismatch {
                address: self.address.clone(),
                expected: self.value_type,
            });
        }
        let old = {
            let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, value.clone())
        };
        // Deliver outside of the locks so callbacks may unsubscribe themselves
        let callbacks: Vec<SharedCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(&value, &old);
        }
        Ok(())
    }
}

impl Channel for SoftChannel {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get(&self) -> Result<ChannelValue, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected(self.address.clone()));
        }
        Ok(self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn put(&self, value: ChannelValue) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected(self.address.clone()));
        }
        self.post(value)
    }

    fn subscribe(&self, callback: MonitorCallback) -> Result<SubscriptionId, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::from(callback)));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub_id, _)| *sub_id != id);
    }
}

/// A ControlClient whose channels live in memory
#[derive(Default)]
pub struct SoftClient {
    channels: Mutex<FxHashMap<String, Arc<SoftChannel>>>,
}

impl SoftClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the channel at an address, creating it if this is the first request
    pub fn channel(&self, address: &str, value_type: ValueType) -> Arc<SoftChannel> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(SoftChannel::new(address, value_type)))
            .clone()
    }

    pub fn lookup(&self, address: &str) -> Option<Arc<SoftChannel>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

impl ControlClient for SoftClient {
    fn connect(&self, binding: &ChannelBinding) -> Result<Arc<dyn Channel>, ChannelError> {
        let channel: Arc<dyn Channel> = self.channel(&binding.read_address, binding.value_type);
        Ok(channel)
    }
}

/// Simulated detector electronics.
///
/// Watches the acquire channel of a device; whenever it goes to the start value, waits
/// for the busy time on a separate thread and then publishes the done value on the
/// watch channel and returns the acquire channel to its idle value.
pub struct SoftDetector;

impl SoftDetector {
    pub fn attach(
        device: &CompositeDevice,
        trigger: &TriggerSpec,
        busy: Duration,
    ) -> Result<SubscriptionId, DeviceError> {
        let acquire = device.channel(&trigger.acquire)?.clone();
        let watch = device.channel(&trigger.watch)?.clone();
        let start_value = trigger.start_value.clone();
        let done_value = trigger.done_value.clone();
        let acquire_ref = Arc::downgrade(&acquire);

        let id = acquire.subscribe(Box::new(move |value, old| {
            if *value != start_value || old == value {
                return;
            }
            let idle = old.clone();
            let watch = watch.clone();
            let done_value = done_value.clone();
            let acquire = acquire_ref.clone();
            std::thread::spawn(move || {
                std::thread::sleep(busy);
                if let Err(e) = watch.put(done_value) {
                    spdlog::error!("Soft detector could not finish acquisition: {e}");
                }
                if let Some(acquire) = acquire.upgrade() {
                    if let Err(e) = acquire.put(idle) {
                        spdlog::error!("Soft detector could not reset acquire: {e}");
                    }
                }
            });
        }))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let channel = Arc::new(SoftChannel::new("8idi:Reg1", ValueType::Number));
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let cb_calls = calls.clone();
        let cb_slot = slot.clone();
        let cb_channel = Arc::downgrade(&channel);
        let id = channel
            .subscribe(Box::new(move |_, _| {
                cb_calls.fetch_add(1, Ordering::SeqCst);
                if let (Some(id), Some(ch)) = (*cb_slot.lock().unwrap(), cb_channel.upgrade()) {
                    ch.unsubscribe(id);
                }
            }))
            .unwrap();
        *slot.lock().unwrap() = Some(id);

        channel.put(ChannelValue::Number(1.0)).unwrap();
        channel.put(ChannelValue::Number(2.0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_disconnected_channel_refuses_io() {
        let client = SoftClient::new();
        let channel = client.channel("8idi:StrReg2", ValueType::Text);
        channel.set_connected(false);
        assert!(channel.get().is_err());
        assert!(channel.put(ChannelValue::from("/data")).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let channel = SoftChannel::new("8idi:Reg2", ValueType::Number);
        assert!(matches!(
            channel.put(ChannelValue::from("25")),
            Err(ChannelError::TypeMismatch { .. })
        ));
    }
}
