use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::ip::address::is_valid_address;
use crate::topology::{DeviceKind, MAX_LAN_SEGMENTS};

/// A lab scenario: the network to build and what to do with it
#[derive(Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Validate the scenario before anything is built from it
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(level) = &self.general.log_level {
            if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
                return Err(ValidationError::InvalidGeneral(format!(
                    "Unknown log_level '{}', expected one of {}",
                    level,
                    LOG_LEVELS.join(", ")
                )));
            }
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ValidationError::InvalidDevice("device name cannot be empty".to_string()));
            }
            if !names.insert(device.name.as_str()) {
                return Err(ValidationError::InvalidDevice(format!(
                    "Device name '{}' is used more than once",
                    device.name
                )));
            }
            device.validate()?;
        }

        for link in &self.links {
            for end in [&link.0, &link.1] {
                let (name, _) = split_endpoint(end);
                if !names.contains(name) {
                    return Err(ValidationError::InvalidLink(format!(
                        "Link endpoint '{}' names an unknown device",
                        end
                    )));
                }
            }
            if split_endpoint(&link.0).0 == split_endpoint(&link.1).0 {
                return Err(ValidationError::InvalidLink(format!(
                    "Link {} <-> {} connects a device to itself",
                    link.0, link.1
                )));
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            for name in step.device_names() {
                if !names.contains(name) {
                    return Err(ValidationError::InvalidStep(format!(
                        "Step {} ({}) names unknown device '{}'",
                        index + 1,
                        step.action(),
                        name
                    )));
                }
            }
            if let Step::ConfigureSegment { segment, lease_time, .. } = step {
                if *segment >= MAX_LAN_SEGMENTS {
                    return Err(ValidationError::InvalidStep(format!(
                        "Step {} targets segment {}, routers have at most {}",
                        index + 1,
                        segment,
                        MAX_LAN_SEGMENTS
                    )));
                }
                check_lease_time(*lease_time).map_err(ValidationError::InvalidStep)?;
            }
        }

        Ok(())
    }
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Shared scenario settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeneralConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Simulation clock at the first step, in milliseconds; wall-clock time when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_start_ms: Option<u64>,
    /// How long a packet marker takes to cross one wire (e.g. "250ms")
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub hop_delay: Option<Duration>,
}

/// One device to place
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Mark the device as a DHCP client
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentConfig>,
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |message: String| ValidationError::InvalidDevice(format!("{}: {}", self.name, message));

        if !self.segments.is_empty() && !self.kind.is_router() {
            return Err(invalid(format!("only routers carry LAN segments, not a {}", self.kind)));
        }
        if self.segments.len() > MAX_LAN_SEGMENTS {
            return Err(invalid(format!("at most {} LAN segments are supported", MAX_LAN_SEGMENTS)));
        }
        if self.dhcp && !self.kind.is_endpoint() {
            return Err(invalid(format!("a {} cannot be a DHCP client", self.kind)));
        }
        if self.dhcp && self.ip.is_some() {
            return Err(invalid("a DHCP client cannot also have a static ip".to_string()));
        }

        for segment in &self.segments {
            for (field, value) in [("ip", Some(&segment.ip)), ("mask", Some(&segment.mask))]
                .into_iter()
                .chain([("pool_start", segment.pool_start.as_ref()), ("pool_end", segment.pool_end.as_ref())])
            {
                if let Some(value) = value {
                    if !is_valid_address(value) {
                        return Err(invalid(format!("segment {} '{}' is not a valid address", field, value)));
                    }
                }
            }
            check_lease_time(segment.lease_time).map_err(invalid)?;
        }
        Ok(())
    }
}

fn check_lease_time(lease_time: Option<Duration>) -> Result<(), String> {
    match lease_time {
        Some(time) if time.as_secs() == 0 => Err(format!("lease_time {:?} is shorter than one second", time)),
        _ => Ok(()),
    }
}

/// A router LAN segment
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SegmentConfig {
    /// Gateway address
    pub ip: String,
    #[serde(default = "default_mask")]
    pub mask: String,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_end: Option<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub lease_time: Option<Duration>,
}

fn default_mask() -> String {
    "255.255.255.0".to_string()
}

/// A cable between two endpoints written as `device` or `device:port`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LinkConfig(pub String, pub String);

/// Split `device:port` into its parts; the port is optional
pub fn split_endpoint(endpoint: &str) -> (&str, Option<&str>) {
    match endpoint.split_once(':') {
        Some((device, port)) => (device.trim(), Some(port.trim())),
        None => (endpoint.trim(), None),
    }
}

/// Something to do once the network is built
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Check reachability and play the echo exchange
    Ping { from: String, to: String },
    /// Report the wiring path only
    Path { from: String, to: String },
    /// Request (or renew) a DHCP lease
    Dhcp { device: String },
    /// Move the simulation clock forward and expire leases
    Advance {
        #[serde(with = "humantime_serde")]
        by: Duration,
    },
    SetAddress {
        device: String,
        ip: String,
        #[serde(default = "default_mask")]
        mask: String,
        #[serde(default)]
        gateway: String,
    },
    ConfigureSegment {
        router: String,
        segment: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dhcp: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool_start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pool_end: Option<String>,
        #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
        lease_time: Option<Duration>,
    },
    Redistribute { router: String },
    Disconnect { a: String, b: String },
    DeleteDevice { device: String },
}

impl Step {
    /// The `action` tag, for messages
    pub fn action(&self) -> &'static str {
        match self {
            Step::Ping { .. } => "ping",
            Step::Path { .. } => "path",
            Step::Dhcp { .. } => "dhcp",
            Step::Advance { .. } => "advance",
            Step::SetAddress { .. } => "set_address",
            Step::ConfigureSegment { .. } => "configure_segment",
            Step::Redistribute { .. } => "redistribute",
            Step::Disconnect { .. } => "disconnect",
            Step::DeleteDevice { .. } => "delete_device",
        }
    }

    /// Device names the step refers to
    pub fn device_names(&self) -> Vec<&str> {
        match self {
            Step::Ping { from, to } | Step::Path { from, to } => vec![from.as_str(), to.as_str()],
            Step::Disconnect { a, b } => vec![a.as_str(), b.as_str()],
            Step::Dhcp { device } | Step::DeleteDevice { device } | Step::SetAddress { device, .. } => {
                vec![device.as_str()]
            }
            Step::ConfigureSegment { router, .. } | Step::Redistribute { router } => vec![router.as_str()],
            Step::Advance { .. } => Vec::new(),
        }
    }
}

/// Scenario validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid device configuration: {0}")]
    InvalidDevice(String),
    #[error("Invalid link: {0}")]
    InvalidLink(String),
    #[error("Invalid step: {0}")]
    InvalidStep(String),
}
