//! DNS lookups for the `dns` step, via hickory-resolver.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use serde_json::Value;

use crate::steps::state::DnsAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsProtocol {
    Udp,
    Tcp,
}

impl DnsProtocol {
    fn as_hickory(self) -> Protocol {
        match self {
            DnsProtocol::Udp => Protocol::Udp,
            DnsProtocol::Tcp => Protocol::Tcp,
        }
    }
}

/// A parsed `dns` step config.
///
/// ```yaml
/// - dns: example.com
/// - dns:
///     domain: example.com
///     type: MX
///     name_servers: [1.1.1.1, 8.8.8.8]
///     protocol: tcp
///     port: 53
///     lifetime: 2
///     timeout: 5
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DnsQuery {
    pub domain: String,
    pub record_type: RecordType,
    /// Empty means the system resolver configuration
    pub name_servers: Vec<IpAddr>,
    pub protocol: DnsProtocol,
    pub port: u16,
    /// Bound on the whole lookup
    pub lifetime: Duration,
    /// Bound on each query to one server
    pub timeout: Duration,
}

impl DnsQuery {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            record_type: RecordType::A,
            name_servers: Vec::new(),
            protocol: DnsProtocol::Udp,
            port: 53,
            lifetime: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }

    /// Parse a step config, collecting every problem.
    pub fn from_config(config: &Value) -> Result<Self, Vec<String>> {
        let map = match config {
            Value::String(domain) if !domain.is_empty() => return Ok(Self::new(domain.as_str())),
            Value::Object(map) => map,
            _ => {
                return Err(vec![
                    "DNS must be a domain name or a mapping containing 'domain'".to_string(),
                ]);
            }
        };

        let mut errors = Vec::new();
        let mut query = Self::new(match map.get("domain") {
            Some(Value::String(domain)) if !domain.is_empty() => domain.as_str(),
            _ => {
                errors.push("DNS config must contain a non-empty 'domain'".to_string());
                ""
            }
        });

        if let Some(value) = map.get("type") {
            match value.as_str().map(|t| RecordType::from_str(&t.to_uppercase())) {
                Some(Ok(record_type)) => query.record_type = record_type,
                _ => errors.push(format!("Invalid DNS record type: {}", value)),
            }
        }

        if let Some(value) = map.get("name_servers") {
            let servers: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            for server in servers {
                match server.as_str().map(IpAddr::from_str) {
                    Some(Ok(ip)) => query.name_servers.push(ip),
                    _ => errors.push(format!("Invalid name server address: {}", server)),
                }
            }
        }

        if let Some(value) = map.get("protocol") {
            match value.as_str().map(str::to_lowercase).as_deref() {
                Some("udp") => query.protocol = DnsProtocol::Udp,
                Some("tcp") => query.protocol = DnsProtocol::Tcp,
                _ => errors.push(format!("DNS protocol must be 'udp' or 'tcp', got {}", value)),
            }
        }

        if let Some(value) = map.get("port") {
            match value.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) if port > 0 => query.port = port,
                _ => errors.push(format!("DNS port must be an integer between 1 and 65535, got {}", value)),
            }
        }

        for (key, target) in [("lifetime", &mut query.lifetime), ("timeout", &mut query.timeout)] {
            if let Some(value) = map.get(key) {
                match value
                    .as_f64()
                    .filter(|secs| *secs > 0.0)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                {
                    Some(duration) => *target = duration,
                    None => errors.push(format!("DNS {} must be a positive number of seconds", key)),
                }
            }
        }

        if errors.is_empty() { Ok(query) } else { Err(errors) }
    }
}

/// Perform the lookup. An empty answer is an error.
pub async fn resolve(query: &DnsQuery) -> Result<DnsAnswer> {
    let mut opts = ResolverOpts::default();
    opts.timeout = query.timeout;

    let config = if query.name_servers.is_empty() {
        match hickory_resolver::system_conf::read_system_conf() {
            Ok((config, _)) => config,
            Err(err) => {
                tracing::debug!(error = %err, "no system resolver config, using defaults");
                ResolverConfig::default()
            }
        }
    } else {
        ResolverConfig::from_parts(None, vec![], servers_for(query))
    };

    let resolver = TokioAsyncResolver::tokio(config, opts);
    let lookup = tokio::time::timeout(
        query.lifetime,
        resolver.lookup(query.domain.as_str(), query.record_type),
    )
    .await
    .map_err(|_| anyhow::anyhow!("DNS lookup timed out after {:?}", query.lifetime))?
    .with_context(|| format!("DNS lookup of {} {} failed", query.record_type, query.domain))?;

    let records: Vec<String> = lookup
        .record_iter()
        .filter(|record| record.record_type() == query.record_type)
        .filter_map(|record| record.data().map(|data| data.to_string()))
        .collect();

    if records.is_empty() {
        bail!("No {} records found for {}", query.record_type, query.domain);
    }

    Ok(DnsAnswer {
        domain: query.domain.clone(),
        record_type: query.record_type.to_string(),
        records,
    })
}

fn servers_for(query: &DnsQuery) -> NameServerConfigGroup {
    let group = NameServerConfigGroup::from_ips_clear(&query.name_servers, query.port, true);
    let wanted = query.protocol.as_hickory();
    let servers: Vec<_> = group
        .iter()
        .filter(|server| server.protocol == wanted)
        .cloned()
        .collect();
    NameServerConfigGroup::from(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_form() {
        let query = DnsQuery::from_config(&json!("example.com")).unwrap();
        assert_eq!(query.domain, "example.com");
        assert_eq!(query.record_type, RecordType::A);
        assert_eq!(query.port, 53);
        assert_eq!(query.protocol, DnsProtocol::Udp);
        assert!(query.name_servers.is_empty());
    }

    #[test]
    fn test_mapping_form() {
        let query = DnsQuery::from_config(&json!({
            "domain": "example.com",
            "type": "mx",
            "name_servers": "1.1.1.1",
            "protocol": "TCP",
            "port": 5353,
            "lifetime": 2,
            "timeout": 0.5
        }))
        .unwrap();

        assert_eq!(query.record_type, RecordType::MX);
        assert_eq!(query.name_servers, vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(query.protocol, DnsProtocol::Tcp);
        assert_eq!(query.port, 5353);
        assert_eq!(query.lifetime, Duration::from_secs(2));
        assert_eq!(query.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_fields_collected() {
        let errors = DnsQuery::from_config(&json!({
            "domain": "example.com",
            "type": "BOGUS",
            "port": "53",
            "protocol": "quic",
            "name_servers": ["not-an-ip"]
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let errors = DnsQuery::from_config(&json!({
            "domain": "example.com",
            "timeout": 1e20,
            "lifetime": -1
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].contains("timeout"));
    }

    #[test]
    fn test_missing_domain() {
        assert!(DnsQuery::from_config(&json!({"type": "A"})).is_err());
        assert!(DnsQuery::from_config(&json!("")).is_err());
        assert!(DnsQuery::from_config(&json!(5)).is_err());
    }

    #[test]
    fn test_servers_filtered_by_protocol() {
        let mut query = DnsQuery::new("example.com");
        query.name_servers = vec!["9.9.9.9".parse().unwrap()];
        query.protocol = DnsProtocol::Tcp;
        let group = servers_for(&query);
        assert_eq!(group.len(), 1);
        assert!(group.iter().all(|s| s.protocol == Protocol::Tcp));
    }
}
