use crate::config::{split_endpoint, DeviceConfig, Scenario, SegmentConfig};
use crate::dhcp::LanSegment;
use crate::topology::{DeviceId, Endpoint, Topology};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{debug, info};
use std::fs::File;
use std::path::Path;

/// Load, parse and validate a scenario from a YAML file
pub fn load_scenario(scenario_path: &Path) -> Result<Scenario> {
    info!("Loading scenario from: {:?}", scenario_path);

    let file = File::open(scenario_path)
        .wrap_err_with(|| format!("Failed to open scenario '{}'", scenario_path.display()))?;
    let scenario: Scenario = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse scenario '{}'", scenario_path.display()))?;
    scenario.validate()?;

    info!(
        "Scenario has {} device(s), {} link(s), {} step(s)",
        scenario.devices.len(),
        scenario.links.len(),
        scenario.steps.len()
    );
    Ok(scenario)
}

/// Build the topology a scenario describes: devices, segments, static
/// addresses and links, in file order
pub fn build_topology(scenario: &Scenario) -> Result<Topology> {
    let mut topology = Topology::new();

    for device in &scenario.devices {
        place_device(&mut topology, device).wrap_err_with(|| format!("Failed to place device '{}'", device.name))?;
    }

    for link in &scenario.links {
        let a = resolve_endpoint(&topology, &link.0)?;
        let b = resolve_endpoint(&topology, &link.1)?;
        topology
            .connect(a, b)
            .wrap_err_with(|| format!("Failed to connect {} <-> {}", link.0, link.1))?;
    }

    debug!(
        "Built topology with {} device(s) and {} connection(s)",
        topology.len(),
        topology.connections().count()
    );
    Ok(topology)
}

fn place_device(topology: &mut Topology, config: &DeviceConfig) -> Result<DeviceId> {
    let id = topology.add_device(config.name.clone(), config.kind)?;

    for (index, segment) in config.segments.iter().enumerate() {
        let segment = build_segment(segment).wrap_err_with(|| format!("Invalid LAN segment {}", index))?;
        topology.add_segment(id, segment)?;
    }

    if let Some(ip) = &config.ip {
        let mask = config.mask.as_deref().unwrap_or("255.255.255.0");
        let gateway = config.gateway.as_deref().unwrap_or("");
        topology.set_address(id, ip, mask, gateway)?;
    }

    if config.dhcp {
        if let Some(device) = topology.device_mut(id) {
            device.config.dhcp_enabled = true;
        }
    }
    Ok(id)
}

fn build_segment(config: &SegmentConfig) -> Result<LanSegment> {
    let mut segment = LanSegment::new(&config.ip, &config.mask)?.with_dhcp(config.dhcp);
    if config.pool_start.is_some() || config.pool_end.is_some() {
        let start = config
            .pool_start
            .clone()
            .unwrap_or_else(|| segment.pool_start().to_string());
        let end = config
            .pool_end
            .clone()
            .unwrap_or_else(|| segment.pool_end().to_string());
        segment.set_pool(&start, &end)?;
    }
    if let Some(lease_time) = config.lease_time {
        segment.set_lease_seconds(lease_time.as_secs())?;
    }
    Ok(segment)
}

/// Resolve `device` or `device:port` against a topology.
///
/// Without a port label the device's first free port is used.
pub fn resolve_endpoint(topology: &Topology, endpoint: &str) -> Result<Endpoint> {
    let (name, port) = split_endpoint(endpoint);
    let device = topology
        .device_by_name(name)
        .ok_or_else(|| eyre!("Unknown device '{}' in endpoint '{}'", name, endpoint))?;

    let index = match port {
        Some(label) => device
            .port_index(label)
            .ok_or_else(|| eyre!("Device '{}' has no port '{}'", name, label))?,
        None => device
            .free_port()
            .ok_or_else(|| eyre!("Device '{}' has no free port left", name))?,
    };
    Ok(Endpoint::new(device.id, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::address::SENTINEL_ADDRESS;
    use crate::topology::DeviceKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OFFICE: &str = r#"
general:
  clock_start_ms: 1000
devices:
  - name: gw
    kind: router
    segments:
      - ip: 10.1.0.1
        dhcp: true
        pool_start: 10.1.0.50
      - ip: 10.2.0.1
        lease_time: 30m
  - name: desk
    kind: switch
  - name: laptop
    kind: host
    dhcp: true
  - name: printer
    kind: server
    ip: 10.2.0.20
    gateway: 10.2.0.1
links:
  - [laptop, desk]
  - ["desk:port8", "gw:lan1"]
  - [printer, "gw:lan2"]
"#;

    fn write_scenario(yaml: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();
        temp_file
    }

    #[test]
    fn test_load_and_build() {
        let temp_file = write_scenario(OFFICE);
        let scenario = load_scenario(temp_file.path()).unwrap();
        let topology = build_topology(&scenario).unwrap();

        assert_eq!(topology.len(), 4);
        assert_eq!(topology.connections().count(), 3);

        let gw = topology.device_by_name("gw").unwrap();
        let first = &gw.config.lan_segments[0];
        assert!(first.dhcp_enabled);
        assert_eq!(first.pool_start().to_string(), "10.1.0.50");
        assert_eq!(first.pool_end().to_string(), "10.1.0.199");
        assert_eq!(gw.config.lan_segments[1].lease_seconds(), 1800);
        assert!(gw.ports[1].connection().is_some());
        assert!(gw.ports[2].connection().is_some());

        let laptop = topology.device_by_name("laptop").unwrap();
        assert!(laptop.config.dhcp_enabled);
        assert_eq!(laptop.config.ip_address, SENTINEL_ADDRESS);

        let printer = topology.device_by_name("printer").unwrap();
        assert_eq!(printer.kind, DeviceKind::Server);
        assert_eq!(printer.config.subnet_mask, "255.255.255.0");
    }

    #[test]
    fn test_conflicting_static_address_fails_build() {
        let yaml = OFFICE.replace("ip: 10.2.0.20", "ip: 10.2.0.1");
        let scenario: Scenario = serde_yaml::from_str(&yaml).unwrap();
        let err = build_topology(&scenario).unwrap_err();
        assert!(format!("{:?}", err).contains("printer"));
    }

    #[test]
    fn test_bad_port_label() {
        let yaml = OFFICE.replace("gw:lan2", "gw:lan7");
        let scenario: Scenario = serde_yaml::from_str(&yaml).unwrap();
        let err = build_topology(&scenario).unwrap_err();
        assert!(err.to_string().contains("lan7"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_scenario(Path::new("/nonexistent/lab.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to open scenario"));
    }

    #[test]
    fn test_invalid_scenario_rejected() {
        let temp_file = write_scenario("devices:\n  - name: sw\n    kind: switch\n    dhcp: true\n");
        assert!(load_scenario(temp_file.path()).is_err());
    }
}
