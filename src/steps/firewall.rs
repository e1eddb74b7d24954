// file: src/steps/firewall.rs
// version: 1.0.0
// guid: fw000001-2345-6789-abcd-ef0123456789

//! Default-deny firewall policy.
//!
//! The rule list is computed up front as a pure plan, then applied once in
//! order: default zone first, allow rules next, the egress drop last and a
//! single reload at the end.

use crate::config::FirewallSettings;
use crate::error::ProvisionError;
use crate::system::{shell_quote, CommandExecutor};
use crate::Result;
use std::net::IpAddr;
use tracing::{info, warn};

/// Zone whose target drops everything not explicitly allowed
pub const DEFAULT_DENY_ZONE: &str = "drop";

/// Address family of a direct rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    fn as_str(self) -> &'static str {
        match self {
            Family::Ipv4 => "ipv4",
            Family::Ipv6 => "ipv6",
        }
    }

    fn of(network: &str) -> Self {
        if network.contains(':') {
            Family::Ipv6
        } else {
            Family::Ipv4
        }
    }
}

/// One firewall change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallRule {
    DefaultZone(String),
    AllowInbound { port: u16 },
    AllowLoopbackEgress(Family),
    AllowEstablishedEgress(Family),
    AllowEgress(String),
    DropEgress(Family),
    Reload,
}

impl FirewallRule {
    /// firewall-cmd invocation for this rule
    pub fn command(&self) -> String {
        match self {
            FirewallRule::DefaultZone(zone) => {
                format!("firewall-cmd --set-default-zone={}", shell_quote(zone))
            }
            FirewallRule::AllowInbound { port } => format!(
                "firewall-cmd --permanent --zone={} --add-port={}/tcp",
                DEFAULT_DENY_ZONE, port
            ),
            FirewallRule::AllowLoopbackEgress(family) => format!(
                "firewall-cmd --permanent --direct --add-rule {} filter OUTPUT 0 -o lo -j ACCEPT",
                family.as_str()
            ),
            FirewallRule::AllowEstablishedEgress(family) => format!(
                "firewall-cmd --permanent --direct --add-rule {} filter OUTPUT 0 -m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT",
                family.as_str()
            ),
            FirewallRule::AllowEgress(network) => format!(
                "firewall-cmd --permanent --direct --add-rule {} filter OUTPUT 1 -d {} -j ACCEPT",
                Family::of(network).as_str(),
                shell_quote(network)
            ),
            FirewallRule::DropEgress(family) => format!(
                "firewall-cmd --permanent --direct --add-rule {} filter OUTPUT 2 -j DROP",
                family.as_str()
            ),
            FirewallRule::Reload => "firewall-cmd --reload".to_string(),
        }
    }
}

/// Whether `ip` falls inside `network`, given in CIDR form
pub fn network_contains(network: &str, ip: IpAddr) -> bool {
    let Some((base, prefix)) = network.split_once('/') else {
        return false;
    };
    let (Ok(base), Ok(prefix)) = (base.parse::<IpAddr>(), prefix.parse::<u32>()) else {
        return false;
    };

    match (base, ip) {
        (IpAddr::V4(base), IpAddr::V4(ip)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(base) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(base), IpAddr::V6(ip)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(base) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

/// Egress exception needed to reach `address`.
///
/// IP literals that no configured network contains get a host rule.
/// Hostnames cannot be pinned here and must resolve inside an allowed range.
pub fn egress_exception(address: &str, settings: &FirewallSettings) -> Option<String> {
    let literal = address.trim_start_matches('[').trim_end_matches(']');
    let ip = literal.parse::<IpAddr>().ok()?;
    if ip.is_loopback() {
        return None;
    }

    let covered = settings
        .allowed_egress
        .iter()
        .chain(&settings.extra_egress)
        .any(|network| network_contains(network, ip));
    if covered {
        return None;
    }

    match ip {
        IpAddr::V4(v4) => Some(format!("{}/32", v4)),
        IpAddr::V6(v6) => Some(format!("{}/128", v6)),
    }
}

/// Ordered rule list for the appliance policy
pub fn plan(settings: &FirewallSettings, agent_port: u16, exceptions: &[String]) -> Vec<FirewallRule> {
    let mut rules = vec![FirewallRule::DefaultZone(DEFAULT_DENY_ZONE.to_string())];

    let mut ports = vec![agent_port];
    for port in &settings.inbound_tcp_ports {
        if !ports.contains(port) {
            ports.push(*port);
        }
    }
    rules.extend(ports.into_iter().map(|port| FirewallRule::AllowInbound { port }));

    for family in [Family::Ipv4, Family::Ipv6] {
        rules.push(FirewallRule::AllowLoopbackEgress(family));
        rules.push(FirewallRule::AllowEstablishedEgress(family));
    }

    let mut networks: Vec<&String> = Vec::new();
    for network in settings
        .allowed_egress
        .iter()
        .chain(&settings.extra_egress)
        .chain(exceptions)
    {
        if !networks.contains(&network) {
            networks.push(network);
        }
    }
    rules.extend(networks.into_iter().map(|n| FirewallRule::AllowEgress(n.clone())));

    rules.push(FirewallRule::DropEgress(Family::Ipv4));
    rules.push(FirewallRule::DropEgress(Family::Ipv6));
    rules.push(FirewallRule::Reload);
    rules
}

/// Applies a firewall plan, each rule at most once
pub struct FirewallManager<'a> {
    exec: &'a mut dyn CommandExecutor,
}

impl<'a> FirewallManager<'a> {
    pub fn new(exec: &'a mut dyn CommandExecutor) -> Self {
        Self { exec }
    }

    /// Apply `rules` in order, stopping at the first failure
    pub async fn apply(&mut self, rules: &[FirewallRule]) -> Result<usize> {
        if !self.exec.check_silent("firewall-cmd --state").await? {
            warn!("firewalld is not running, starting it");
            self.exec
                .execute("systemctl enable --now firewalld")
                .await
                .map_err(|e| ProvisionError::firewall(format!("Failed to start firewalld: {}", e)))?;
        }

        for (applied, rule) in rules.iter().enumerate() {
            let command = rule.command();
            self.exec.execute(&command).await.map_err(|e| {
                ProvisionError::firewall(format!(
                    "Rule {} of {} failed ({}): {}",
                    applied + 1,
                    rules.len(),
                    command,
                    e
                ))
            })?;
        }

        info!("Applied {} firewall rules", rules.len());
        Ok(rules.len())
    }
}
