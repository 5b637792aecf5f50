//! `network_probe`: TCP connect scan of a host or a small IPv4 range.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use ava_domain::capability::NetworkProbeArgs;
use ava_domain::config::ProbeConfig;
use ava_domain::error::{Error, Result};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;

const MAX_PORTS: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostReport {
    pub host: String,
    pub open_ports: Vec<u16>,
    /// Fastest successful connect, if any port answered.
    pub latency_ms: Option<u64>,
    pub device_type: &'static str,
}

pub struct NetworkProber {
    cfg: ProbeConfig,
}

impl NetworkProber {
    pub fn new(cfg: ProbeConfig) -> Self {
        Self { cfg }
    }

    /// Check arguments and expand them into target addresses.
    pub async fn targets(&self, args: &NetworkProbeArgs) -> Result<(Vec<IpAddr>, Vec<u16>)> {
        let ports = match &args.ports {
            None => self.cfg.default_ports.clone(),
            Some(p) if p.is_empty() => {
                return Err(Error::InvalidArgument("ports must not be empty".into()))
            }
            Some(p) if p.len() > MAX_PORTS => {
                return Err(Error::InvalidArgument(format!("at most {MAX_PORTS} ports per probe")))
            }
            Some(p) if p.contains(&0) => {
                return Err(Error::InvalidArgument("port 0 is not probeable".into()))
            }
            Some(p) => {
                let mut p = p.clone();
                p.sort_unstable();
                p.dedup();
                p
            }
        };

        let hosts = match (&args.cidr, &args.host) {
            (Some(cidr), None) => expand_cidr(cidr, self.cfg.max_hosts)?,
            (None, Some(host)) => vec![resolve(host).await?],
            _ => {
                return Err(Error::InvalidArgument(
                    "exactly one of 'cidr' or 'host' is required".into(),
                ))
            }
        };
        Ok((hosts, ports))
    }

    pub async fn probe(&self, args: &NetworkProbeArgs) -> Result<Value> {
        let (hosts, ports) = self.targets(args).await?;
        let single_host = args.host.is_some();
        let connect_timeout = Duration::from_millis(self.cfg.connect_timeout_ms);

        let pairs: Vec<(IpAddr, u16)> = hosts
            .iter()
            .flat_map(|h| ports.iter().map(move |p| (*h, *p)))
            .collect();

        let results: Vec<(IpAddr, u16, Option<u64>)> = stream::iter(pairs)
            .map(|(ip, port)| async move {
                let started = Instant::now();
                let addr = SocketAddr::new(ip, port);
                let open = matches!(
                    tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await,
                    Ok(Ok(_))
                );
                (ip, port, open.then(|| started.elapsed().as_millis() as u64))
            })
            .buffer_unordered(self.cfg.concurrency.max(1))
            .collect()
            .await;

        let mut reports: Vec<HostReport> = hosts
            .iter()
            .map(|ip| {
                let mut open_ports: Vec<u16> = Vec::new();
                let mut latency: Option<u64> = None;
                for (_, port, ms) in results.iter().filter(|(h, _, _)| h == ip) {
                    if let Some(ms) = ms {
                        open_ports.push(*port);
                        latency = Some(latency.map_or(*ms, |l| l.min(*ms)));
                    }
                }
                open_ports.sort_unstable();
                HostReport {
                    host: ip.to_string(),
                    device_type: guess_device_type(&open_ports),
                    open_ports,
                    latency_ms: latency,
                }
            })
            .filter(|r| single_host || !r.open_ports.is_empty())
            .collect();
        reports.sort_by(|a, b| a.host.cmp(&b.host));

        tracing::debug!(
            hosts = hosts.len(),
            ports = ports.len(),
            responsive = reports.iter().filter(|r| !r.open_ports.is_empty()).count(),
            "network probe finished"
        );
        Ok(json!({ "hosts": reports }))
    }
}

/// Expand `a.b.c.d/n`, refusing ranges larger than `max_hosts`.
pub fn expand_cidr(cidr: &str, max_hosts: usize) -> Result<Vec<IpAddr>> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::InvalidArgument(format!("'{cidr}' is not in a.b.c.d/n form")))?;
    let addr: Ipv4Addr = addr
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("'{addr}' is not an IPv4 address")))?;
    let prefix: u32 = prefix
        .trim()
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| Error::InvalidArgument(format!("'{prefix}' is not a valid prefix length")))?;

    let size = 1u64 << (32 - prefix);
    if size > max_hosts as u64 {
        return Err(Error::ResourceExhausted(format!(
            "{cidr} covers {size} addresses; at most {max_hosts} per probe"
        )));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(addr) & mask;
    let range: Vec<u32> = if prefix >= 31 {
        (0..size as u32).map(|i| network + i).collect()
    } else {
        // Skip the network and broadcast addresses.
        (1..size as u32 - 1).map(|i| network + i).collect()
    };
    Ok(range.into_iter().map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect())
}

async fn resolve(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| Error::ExternalFailure(format!("cannot resolve '{host}': {e}")))?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| Error::ExternalFailure(format!("'{host}' resolved to no addresses")))
}

fn guess_device_type(open_ports: &[u16]) -> &'static str {
    if open_ports.contains(&22) {
        "ssh_host"
    } else if open_ports.contains(&23) {
        "telnet_device"
    } else if open_ports.contains(&554) {
        "camera"
    } else if open_ports.contains(&80) || open_ports.contains(&443) {
        "web_device"
    } else if !open_ports.is_empty() {
        "network_service"
    } else {
        "unknown"
    }
}
