//! The seam between this crate and the control-system client library.
//!
//! Everything that talks to hardware goes through [`Channel`]. A [`ControlClient`]
//! resolves a [`ChannelBinding`] (the address strings plus the value type declared in
//! the device catalog) into a live channel. The wire protocol lives entirely behind
//! these traits; the crate ships an in-memory implementation in [`crate::soft`].
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;

use super::error::ChannelError;

/// The two kinds of values a channel can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Number,
    Text,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "numeric"),
            Self::Text => write!(f, "string"),
        }
    }
}

/// A single value read from or written to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Number(f64),
    Text(String),
}

impl ChannelValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(s) => Some(s),
        }
    }

    /// The value a freshly created channel of the given type holds
    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Number => Self::Number(0.0),
            ValueType::Text => Self::Text(String::new()),
        }
    }
}

impl Display for ChannelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u32> for ChannelValue {
    fn from(value: u32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for ChannelValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ChannelValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Addresses and type of one bound attribute, as produced by the device catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    pub read_address: String,
    pub write_address: Option<String>,
    pub value_type: ValueType,
}

impl ChannelBinding {
    pub fn is_settable(&self) -> bool {
        self.write_address.is_some()
    }
}

/// Identifies a change-of-value subscription on a single channel
pub type SubscriptionId = u64;

/// Change-of-value callback, called with `(value, old_value)`
pub type MonitorCallback = Box<dyn Fn(&ChannelValue, &ChannelValue) + Send + Sync>;

/// One live control-system value.
///
/// Callbacks are delivered on the client's own thread. Implementations must allow a
/// callback to unsubscribe itself while it is being delivered.
pub trait Channel: Send + Sync {
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn get(&self) -> Result<ChannelValue, ChannelError>;

    fn put(&self, value: ChannelValue) -> Result<(), ChannelError>;

    fn subscribe(&self, callback: MonitorCallback) -> Result<SubscriptionId, ChannelError>;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Resolves catalog bindings into live channels
pub trait ControlClient: Send + Sync {
    fn connect(&self, binding: &ChannelBinding) -> Result<Arc<dyn Channel>, ChannelError>;
}
