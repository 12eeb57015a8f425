use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::channel::ValueType;
use super::series_status::SeriesStatus;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Channel {0} is not connected")]
    Disconnected(String),
    #[error("Channel {address} expected a {expected} value")]
    TypeMismatch { address: String, expected: ValueType },
    #[error("Channel {0} is read-only")]
    ReadOnly(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("DeviceCatalog failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DeviceCatalog failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("DeviceCatalog has no device named {0}")]
    UnknownDevice(String),
    #[error("DeviceCatalog found the attribute {1} declared twice in device {0}")]
    DuplicateAttribute(String, String),
    #[error("DeviceCatalog failed to bind a channel: {0}")]
    ChannelError(#[from] ChannelError),
}

/// Raised by stage() when a configuration cannot be applied to a device
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Device {device} has no attribute {key}")]
    UnknownAttribute { device: String, key: String },
    #[error("Attribute {key} of device {device} is not settable")]
    ReadOnlyAttribute { device: String, key: String },
    #[error("Attribute {key} of device {device} expects a {expected} value")]
    TypeMismatch {
        device: String,
        key: String,
        expected: ValueType,
    },
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device {0} has no channel {1}")]
    UnknownChannel(String, String),
    #[error("Device {device} did not connect within {timeout:?}; unconnected: {missing:?}")]
    ConnectionTimeout {
        device: String,
        timeout: Duration,
        missing: Vec<String>,
    },
    #[error("Device {0} was triggered while a previous acquisition is still in flight")]
    ConcurrentTrigger(String),
    #[error("Device {0} is already staged")]
    AlreadyStaged(String),
    #[error("Readback {address} did not settle at {target} within {timeout:?}")]
    SettleTimeout {
        address: String,
        target: f64,
        timeout: Duration,
    },
    #[error("Device failed due to configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("Device failed due to channel error: {0}")]
    ChannelError(#[from] ChannelError),
}

#[derive(Debug, Clone, Error)]
pub enum StatusError {
    #[error("Status of device {device} failed: {reason}")]
    Failed { device: String, reason: String },
    #[error("Status of device {device} did not complete within {timeout:?}")]
    Timeout { device: String, timeout: Duration },
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Registers have no entry named {0}")]
    UnknownRegister(String),
    #[error("Register {name} does not hold a {expected} value")]
    WrongType { name: String, expected: ValueType },
    #[error("Registers failed due to device error: {0}")]
    DeviceError(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum DetectorProfileError {
    #[error("DetectorProfiles failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DetectorProfiles failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("MetadataExporter failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("MetadataExporter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("MetadataExporter could not encode a string dataset: {0}")]
    InvalidString(String),
    #[error("MetadataExporter refused to overwrite existing file {0:?}")]
    FileExists(PathBuf),
    #[error("MetadataExporter has no detector profile for detector number {0}")]
    UnknownDetector(u32),
    #[error("MetadataExporter found an unusable value in register {name}: {reason}")]
    InvalidRegister { name: String, reason: String },
    #[error("MetadataExporter failed due to register error: {0}")]
    RegisterError(#[from] RegisterError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("WorkflowDispatcher failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Command `{command}` returned error:\n{stderr}")]
    Stderr { command: String, stderr: String },
    #[error("WorkflowDispatcher cannot run shell commands on {0}")]
    UnsupportedPlatform(String),
    #[error("WorkflowDispatcher failed due to export error: {0}")]
    ExportError(#[from] ExportError),
    #[error("WorkflowDispatcher failed due to register error: {0}")]
    RegisterError(#[from] RegisterError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("Instrument failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Instrument failed due to DeviceCatalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Instrument failed due to Device error: {0}")]
    DeviceError(#[from] DeviceError),
    #[error("Instrument failed due to DetectorProfiles error: {0}")]
    ProfileError(#[from] DetectorProfileError),
    #[error("Instrument failed due to Register error: {0}")]
    RegisterError(#[from] RegisterError),
    #[error("Instrument requires device {0}, which the catalog does not declare")]
    MissingDevice(String),
    #[error("Device {0} declares no trigger and cannot be used as the acquisition detector")]
    NoTrigger(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process failed due to Device error: {0}")]
    DeviceError(#[from] DeviceError),
    #[error("Process failed due to Status error: {0}")]
    StatusError(#[from] StatusError),
    #[error("Process failed due to Register error: {0}")]
    RegisterError(#[from] RegisterError),
    #[error("Process failed due to Dispatch error: {0}")]
    DispatchError(#[from] DispatchError),
    #[error("Process failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<SeriesStatus>),
}
