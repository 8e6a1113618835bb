//! Scenario orchestrator.
//!
//! Builds the topology a scenario describes, applies its steps in order and
//! plays every resulting packet effect through the animation sequencer before
//! moving on, the way an interactive session awaits each animation.

use crate::animation::{plan_dhcp_exchange, plan_ping, AnimationQueue, PacketEffect, PingPlan};
use crate::config::{Scenario, Step};
use crate::config_loader::build_topology;
use crate::dhcp::{
    configure_segment, redistribute, request_dhcp_address, sweep_expired, DhcpError, DhcpOffer, SegmentSettings,
};
use crate::topology::{find_path, DeviceId, Topology};
use crate::utils::validation::validate_topology;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

/// Marker speed when neither the command line nor the scenario sets one
pub const DEFAULT_HOP_DELAY: Duration = Duration::from_millis(100);

/// Outcome of one DHCP request, by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<usize>,
    pub renewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DhcpReport {
    fn new(topology: &Topology, client: DeviceId, outcome: &Result<DhcpOffer, DhcpError>) -> Self {
        let device = topology.name_of(client);
        match outcome {
            Ok(offer) => Self {
                device,
                ip: Some(offer.ip.to_string()),
                router: Some(topology.name_of(offer.router)),
                segment: Some(offer.segment),
                renewed: offer.renewed,
                error: None,
            },
            Err(e) => Self {
                device,
                ip: None,
                router: None,
                segment: None,
                renewed: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// What one scenario step did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepReport {
    Ping {
        from: String,
        to: String,
        plan: PingPlan,
    },
    Path {
        from: String,
        to: String,
        path: Vec<String>,
    },
    Dhcp(DhcpReport),
    Advance {
        now_ms: u64,
        expired: usize,
    },
    SetAddress {
        device: String,
        ip: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ConfigureSegment {
        router: String,
        segment: usize,
        results: Vec<DhcpReport>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Redistribute {
        router: String,
        results: Vec<DhcpReport>,
    },
    Disconnect {
        a: String,
        b: String,
        removed: bool,
    },
    DeleteDevice {
        device: String,
    },
}

/// A lease still on the books when the scenario ends
#[derive(Debug, Clone, Serialize)]
pub struct LeaseReport {
    pub router: String,
    pub segment: usize,
    pub ip: String,
    pub client: String,
    pub expires_at: u64,
    /// Lease time left at the end of the run
    pub remaining_ms: u64,
}

/// Everything a scenario run produced
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub clock_start_ms: u64,
    pub clock_end_ms: u64,
    pub devices: usize,
    pub connections: usize,
    pub effects_played: usize,
    pub steps: Vec<StepReport>,
    pub leases: Vec<LeaseReport>,
}

/// A packet effect resolved to device names, safe to play after the topology changes
struct Rendered {
    label: String,
    hops: Vec<String>,
    completes: bool,
}

impl Rendered {
    fn new(topology: &Topology, effect: &PacketEffect) -> Self {
        Self {
            label: effect.label.clone(),
            hops: effect.hops.iter().map(|id| topology.name_of(*id)).collect(),
            completes: effect.completes,
        }
    }
}

/// Log-based renderer: walk the marker across each wire
async fn play_effect(effect: Rendered, hop_delay: Duration) -> Result<()> {
    for pair in effect.hops.windows(2) {
        debug!("{}: {} -> {}", effect.label, pair[0], pair[1]);
        if !hop_delay.is_zero() {
            tokio::time::sleep(hop_delay).await;
        }
    }

    let last = effect
        .hops
        .last()
        .ok_or_else(|| eyre!("'{}' has no hops to play", effect.label))?;
    if effect.completes {
        info!("{} arrived at {}", effect.label, last);
    } else {
        info!("{} dropped at {}", effect.label, last);
    }
    Ok(())
}

/// A running scenario
struct Simulation {
    topology: Topology,
    now: u64,
    queue: AnimationQueue<()>,
    hop_delay: Duration,
    effects_played: usize,
}

impl Simulation {
    fn device(&self, name: &str) -> Result<DeviceId> {
        self.topology
            .device_by_name(name)
            .map(|device| device.id)
            .ok_or_else(|| eyre!("Device '{}' does not exist (deleted by an earlier step?)", name))
    }

    /// Queue the effects in order and wait until all of them have played
    async fn play(&mut self, effects: &[PacketEffect]) {
        let pending: Vec<_> = effects
            .iter()
            .map(|effect| {
                self.queue
                    .enqueue(play_effect(Rendered::new(&self.topology, effect), self.hop_delay))
            })
            .collect();

        for outcome in pending {
            match outcome.await {
                Ok(()) => self.effects_played += 1,
                Err(e) => warn!("Packet effect was not shown: {}", e),
            }
        }
    }

    /// Play the discover/offer exchange of every reassigned client, then report them
    async fn replay_dhcp(&mut self, results: &[(DeviceId, Result<DhcpOffer, DhcpError>)]) -> Vec<DhcpReport> {
        let effects: Vec<PacketEffect> = results
            .iter()
            .flat_map(|(client, outcome)| plan_dhcp_exchange(&self.topology, *client, outcome))
            .collect();
        self.play(&effects).await;

        results
            .iter()
            .map(|(client, outcome)| DhcpReport::new(&self.topology, *client, outcome))
            .collect()
    }

    async fn apply(&mut self, step: &Step) -> Result<StepReport> {
        let report = match step {
            Step::Ping { from, to } => {
                let plan = plan_ping(&self.topology, self.device(from)?, self.device(to)?);
                info!("Ping {} -> {}: {}", from, to, plan.reachability.reason);
                self.play(&plan.effects).await;
                StepReport::Ping {
                    from: from.clone(),
                    to: to.clone(),
                    plan,
                }
            }
            Step::Path { from, to } => {
                let path = find_path(&self.topology, self.device(from)?, self.device(to)?);
                StepReport::Path {
                    from: from.clone(),
                    to: to.clone(),
                    path: path.iter().map(|id| self.topology.name_of(*id)).collect(),
                }
            }
            Step::Dhcp { device } => {
                let client = self.device(device)?;
                let outcome = request_dhcp_address(&mut self.topology, client, self.now);
                let effects = plan_dhcp_exchange(&self.topology, client, &outcome);
                self.play(&effects).await;
                StepReport::Dhcp(DhcpReport::new(&self.topology, client, &outcome))
            }
            Step::Advance { by } => {
                self.now = self.now.saturating_add(u64::try_from(by.as_millis()).unwrap_or(u64::MAX));
                let expired = sweep_expired(&mut self.topology, self.now);
                info!("Clock advanced to {} ms, {} lease(s) expired", self.now, expired);
                StepReport::Advance {
                    now_ms: self.now,
                    expired,
                }
            }
            Step::SetAddress {
                device,
                ip,
                mask,
                gateway,
            } => {
                let id = self.device(device)?;
                let error = self
                    .topology
                    .set_address(id, ip, mask, gateway)
                    .err()
                    .map(|e| e.to_string());
                if let Some(error) = &error {
                    warn!("Static address {} rejected for '{}': {}", ip, device, error);
                }
                StepReport::SetAddress {
                    device: device.clone(),
                    ip: ip.clone(),
                    error,
                }
            }
            Step::ConfigureSegment {
                router,
                segment,
                dhcp,
                pool_start,
                pool_end,
                lease_time,
            } => {
                let id = self.device(router)?;
                let settings = SegmentSettings {
                    dhcp_enabled: *dhcp,
                    pool_start: pool_start.clone(),
                    pool_end: pool_end.clone(),
                    lease_seconds: lease_time.map(|time| time.as_secs()),
                };
                let (results, error) = match configure_segment(&mut self.topology, id, *segment, &settings, self.now) {
                    Ok(results) => (self.replay_dhcp(&results).await, None),
                    Err(e) => {
                        warn!("Segment {} of '{}' left unchanged: {}", segment, router, e);
                        (Vec::new(), Some(e.to_string()))
                    }
                };
                StepReport::ConfigureSegment {
                    router: router.clone(),
                    segment: *segment,
                    results,
                    error,
                }
            }
            Step::Redistribute { router } => {
                let id = self.device(router)?;
                let results = redistribute(&mut self.topology, id, self.now);
                StepReport::Redistribute {
                    router: router.clone(),
                    results: self.replay_dhcp(&results).await,
                }
            }
            Step::Disconnect { a, b } => {
                let (a_id, b_id) = (self.device(a)?, self.device(b)?);
                let link = self.topology.connection_between(a_id, b_id).map(|connection| connection.id);
                if let Some(link) = link {
                    self.topology.disconnect(link)?;
                }
                StepReport::Disconnect {
                    a: a.clone(),
                    b: b.clone(),
                    removed: link.is_some(),
                }
            }
            Step::DeleteDevice { device } => {
                let id = self.device(device)?;
                self.topology.remove_device(id)?;
                StepReport::DeleteDevice { device: device.clone() }
            }
        };
        Ok(report)
    }

    fn leases(&self) -> Vec<LeaseReport> {
        let mut leases = Vec::new();
        for router in self.topology.devices() {
            for (index, segment) in router.config.lan_segments.iter().enumerate() {
                for (ip, lease) in segment.leases() {
                    leases.push(LeaseReport {
                        router: router.name.clone(),
                        segment: index,
                        ip: std::net::Ipv4Addr::from(*ip).to_string(),
                        client: self.topology.name_of(lease.client),
                        expires_at: lease.expires_at,
                        remaining_ms: lease.remaining(self.now),
                    });
                }
            }
        }
        leases
    }
}

/// Run a scenario to completion and report what happened.
///
/// Must be called from within a tokio runtime; packet effects are played on
/// an animation sequencer spawned for the run.
pub async fn run_scenario(scenario: &Scenario, hop_delay: Duration) -> Result<Report> {
    let topology = build_topology(scenario).wrap_err("Failed to build topology")?;
    validate_topology(&topology).map_err(|e| eyre!("Scenario produced an inconsistent topology: {}", e))?;

    let clock_start_ms = scenario
        .general
        .clock_start_ms
        .unwrap_or_else(|| u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0));

    let mut simulation = Simulation {
        topology,
        now: clock_start_ms,
        queue: AnimationQueue::spawn(),
        hop_delay,
        effects_played: 0,
    };

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        debug!("Step {}: {}", index + 1, step.action());
        let report = simulation
            .apply(step)
            .await
            .wrap_err_with(|| format!("Step {} ({}) failed", index + 1, step.action()))?;
        validate_topology(&simulation.topology)
            .map_err(|e| eyre!("Topology inconsistent after step {}: {}", index + 1, e))?;
        steps.push(report);
    }

    info!(
        "Scenario finished: {} step(s), {} effect(s) played",
        steps.len(),
        simulation.effects_played
    );

    Ok(Report {
        generated_at: Utc::now(),
        clock_start_ms,
        clock_end_ms: simulation.now,
        devices: simulation.topology.len(),
        connections: simulation.topology.connections().count(),
        effects_played: simulation.effects_played,
        leases: simulation.leases(),
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAB: &str = r#"
general:
  clock_start_ms: 0
devices:
  - name: r1
    kind: router
    segments:
      - ip: 192.168.1.1
        dhcp: true
        pool_start: 192.168.1.100
        pool_end: 192.168.1.101
        lease_time: 1h
      - ip: 192.168.2.1
  - name: sw
    kind: switch
  - name: pc1
    kind: host
    dhcp: true
  - name: pc2
    kind: host
    dhcp: true
  - name: web
    kind: server
    ip: 192.168.2.10
    gateway: 192.168.2.1
links:
  - [pc1, sw]
  - [pc2, sw]
  - ["sw:port8", "r1:lan1"]
  - [web, "r1:lan2"]
steps:
  - action: ping
    from: pc1
    to: web
  - action: dhcp
    device: pc1
  - action: dhcp
    device: pc2
  - action: ping
    from: pc1
    to: web
  - action: path
    from: pc2
    to: web
  - action: advance
    by: 2h
  - action: configure_segment
    router: r1
    segment: 0
    pool_start: 192.168.1.150
    pool_end: 192.168.1.160
"#;

    #[tokio::test]
    async fn test_run_lab_scenario() {
        let scenario: Scenario = serde_yaml::from_str(LAB).unwrap();
        let report = run_scenario(&scenario, Duration::ZERO).await.unwrap();

        assert_eq!(report.steps.len(), 7);
        match &report.steps[0] {
            StepReport::Ping { plan, .. } => {
                assert!(!plan.delivered);
                assert_eq!(plan.hops_travelled, 0);
            }
            other => panic!("unexpected step {:?}", other),
        }
        match &report.steps[2] {
            StepReport::Dhcp(dhcp) => assert_eq!(dhcp.ip.as_deref(), Some("192.168.1.101")),
            other => panic!("unexpected step {:?}", other),
        }
        match &report.steps[3] {
            StepReport::Ping { plan, .. } => assert!(plan.delivered, "{}", plan.reachability.reason),
            other => panic!("unexpected step {:?}", other),
        }
        match &report.steps[4] {
            StepReport::Path { path, .. } => assert_eq!(path, &["pc2", "sw", "r1", "web"]),
            other => panic!("unexpected step {:?}", other),
        }
        match &report.steps[5] {
            StepReport::Advance { now_ms, expired } => {
                assert_eq!(*now_ms, 7_200_000);
                assert_eq!(*expired, 2);
            }
            other => panic!("unexpected step {:?}", other),
        }
        // Both clients are still DHCP clients of r1 and move into the new pool
        match &report.steps[6] {
            StepReport::ConfigureSegment { results, error, .. } => {
                assert!(error.is_none());
                let ips: Vec<_> = results.iter().filter_map(|r| r.ip.as_deref()).collect();
                assert_eq!(ips, ["192.168.1.150", "192.168.1.151"]);
            }
            other => panic!("unexpected step {:?}", other),
        }

        assert_eq!(report.leases.len(), 2);
        assert!(report.leases.iter().all(|lease| lease.remaining_ms == 3_600_000));
        // 1 failed request + 2x(discover, offer) + echo request/reply
        // + 2x(discover, offer) for the moved clients
        assert_eq!(report.effects_played, 11);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["steps"][0]["action"], "ping");
        assert_eq!(json["steps"][0]["plan"]["reachability"]["failure"], "invalid_config");
    }

    #[tokio::test]
    async fn test_step_on_deleted_device_fails() {
        let yaml = r#"
devices:
  - name: a
    kind: host
  - name: b
    kind: host
links:
  - [a, b]
steps:
  - action: delete_device
    device: b
  - action: ping
    from: a
    to: b
"#;
        let scenario: Scenario = serde_yaml::from_str(yaml).unwrap();
        let err = run_scenario(&scenario, Duration::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("Step 2 (ping)"));
    }
}
