//! The device catalog: which hardware exists and where its channels live.
//!
//! A catalog is a YAML table of devices. Each device has an address prefix, a list of
//! channels and optionally nested components with their own prefixes:
//!
//! ```yml
//! devices:
//!   - name: lambdadet
//!     prefix: "8LAMBDA1:"
//!     labels: [lambda, detectors]
//!     components:
//!       - name: cam
//!         prefix: "cam1:"
//!         channels:
//!           - { name: acquire, address: Acquire, kind: with_rbv }
//! ```
//!
//! The channel kind decides how the read and write addresses are derived from the
//! address:
//!
//! - `signal`: read and write the same address (or the explicit `write` address)
//! - `signal_ro`: read only
//! - `with_rbv`: read `<address>_RBV`, write `<address>`
//! - `motor`: read `<address>.RBV`, write `<address>.VAL`
//!
//! If no catalog path is given, the table bundled with the crate is used.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::channel::{ChannelBinding, ControlClient, ValueType};
use super::device::{BoundChannel, CompositeDevice};
use super::error::CatalogError;
use super::sequencer::TriggerSpec;

/// Load the bundled catalog for windows
#[cfg(target_family = "windows")]
fn load_default_catalog() -> String {
    String::from(include_str!("data\\beamline_devices.yml"))
}

/// Load the bundled catalog for macos and linux
#[cfg(target_family = "unix")]
fn load_default_catalog() -> String {
    String::from(include_str!("data/beamline_devices.yml"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Signal,
    SignalRo,
    WithRbv,
    Motor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub value: ValueType,
    /// Separate write address, only meaningful for `signal`
    #[serde(default)]
    pub write: Option<String>,
}

impl ChannelSpec {
    /// Derive the binding for this channel under an address prefix
    pub fn binding(&self, prefix: &str) -> ChannelBinding {
        let address = format!("{prefix}{}", self.address);
        let (read_address, write_address) = match self.kind {
            ChannelKind::Signal => {
                let write = match &self.write {
                    Some(w) => format!("{prefix}{w}"),
                    None => address.clone(),
                };
                (address, Some(write))
            }
            ChannelKind::SignalRo => (address, None),
            ChannelKind::WithRbv => (format!("{address}_RBV"), Some(address)),
            ChannelKind::Motor => (format!("{address}.RBV"), Some(format!("{address}.VAL"))),
        };
        ChannelBinding {
            read_address,
            write_address,
            value_type: self.value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    /// How to start an acquisition and observe its completion, for detectors
    #[serde(default)]
    pub trigger: Option<TriggerSpec>,
    /// Component whose FullFileName reports the file a detector wrote
    #[serde(default)]
    pub file_plugin: Option<String>,
}

/// DeviceCatalog holds the declarative device table and builds devices from it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCatalog {
    pub devices: Vec<DeviceSpec>,
}

impl DeviceCatalog {
    /// Create a new DeviceCatalog.
    /// If the path is None, we load the default that is bundled with the crate
    pub fn new(path: Option<&Path>) -> Result<Self, CatalogError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_catalog();
        }
        Ok(serde_yaml::from_str::<Self>(&contents)?)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceSpec> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Names of the devices carrying a label
    pub fn labelled(&self, label: &str) -> Vec<&str> {
        self.devices
            .iter()
            .filter(|d| d.labels.iter().any(|l| l == label))
            .map(|d| d.name.as_str())
            .collect()
    }

    /// Build a device by binding every channel through the client
    pub fn build(
        &self,
        name: &str,
        client: &dyn ControlClient,
    ) -> Result<CompositeDevice, CatalogError> {
        let spec = self
            .device(name)
            .ok_or_else(|| CatalogError::UnknownDevice(name.to_string()))?;
        let mut device = CompositeDevice::new(&spec.name, spec.labels.clone());
        bind_channels(
            &mut device,
            "",
            &spec.prefix,
            &spec.channels,
            &spec.components,
            client,
        )?;
        spdlog::debug!(
            "Built device {} with {} channels",
            spec.name,
            device.paths().len()
        );
        Ok(device)
    }
}

fn bind_channels(
    device: &mut CompositeDevice,
    path: &str,
    prefix: &str,
    channels: &[ChannelSpec],
    components: &[ComponentSpec],
    client: &dyn ControlClient,
) -> Result<(), CatalogError> {
    for spec in channels {
        let full_path = format!("{path}{}", spec.name);
        let binding = spec.binding(prefix);
        let channel = client.connect(&binding)?;
        if !device.insert(&full_path, BoundChannel { binding, channel }) {
            return Err(CatalogError::DuplicateAttribute(
                device.name().to_string(),
                full_path,
            ));
        }
    }
    for component in components {
        bind_channels(
            device,
            &format!("{path}{}.", component.name),
            &format!("{prefix}{}", component.prefix),
            &component.channels,
            &component.components,
            client,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftClient;

    #[test]
    fn test_default_catalog() {
        let catalog = match DeviceCatalog::new(None) {
            Ok(c) => c,
            Err(_) => panic!(),
        };
        let client = SoftClient::new();
        let lambda = catalog.build("lambdadet", &client).unwrap();
        let acquire = lambda.binding("cam.acquire").unwrap();
        assert_eq!(acquire.read_address, "8LAMBDA1:cam1:Acquire_RBV");
        assert_eq!(
            acquire.write_address.as_deref(),
            Some("8LAMBDA1:cam1:Acquire")
        );
        assert!(!lambda.binding("immout.num_captured").unwrap().is_settable());
        assert!(catalog.device("lambdadet").unwrap().trigger.is_some());

        let registers = catalog.build("dm_pars", &client).unwrap();
        assert_eq!(
            registers.binding("root_folder").unwrap().value_type,
            ValueType::Text
        );
        assert!(catalog.labelled("motor").contains(&"sample"));
    }

    #[test]
    fn test_motor_binding() {
        let spec = ChannelSpec {
            name: String::from("x"),
            address: String::from("m54"),
            kind: ChannelKind::Motor,
            value: ValueType::Number,
            write: None,
        };
        let binding = spec.binding("8idi:");
        assert_eq!(binding.read_address, "8idi:m54.RBV");
        assert_eq!(binding.write_address.as_deref(), Some("8idi:m54.VAL"));
    }

    #[test]
    fn test_duplicate_attribute() {
        let yaml = "devices:\n  - name: att\n    channels:\n      - { name: a, address: A }\n      - { name: a, address: B }\n";
        let catalog: DeviceCatalog = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            catalog.build("att", &SoftClient::new()),
            Err(CatalogError::DuplicateAttribute(_, _))
        ));
    }
}
