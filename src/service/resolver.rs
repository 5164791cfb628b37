//! Master address discovery.
//!
//! With SRV enabled the node asks a fixed public nameserver for
//! `_wired._tcp.<wired_host>` and dials the first record. Any failure falls
//! back to the configured `master_address`.

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::config::{NodeConfig, SRV_SERVICE};
use crate::error::{ProtocolError, Result};

/// Address to dial for the master
pub async fn master_address(config: &NodeConfig) -> String {
    if !config.use_srv {
        return config.master_address.clone();
    }
    match resolve_srv(&config.srv_nameserver, &config.wired_host).await {
        Ok(addr) => {
            debug!(%addr, "Master resolved via SRV");
            addr.to_string()
        }
        Err(e) => {
            warn!(error = %e, fallback = %config.master_address, "SRV lookup failed");
            config.master_address.clone()
        }
    }
}

/// Look up `_wired._tcp.<domain>` through `nameserver` (`ip:port`)
pub async fn resolve_srv(nameserver: &str, domain: &str) -> Result<SocketAddr> {
    let nameserver: SocketAddr = nameserver
        .parse()
        .map_err(|e| ProtocolError::Resolve(format!("bad nameserver {nameserver}: {e}")))?;
    let group = NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
    let resolver = TokioAsyncResolver::tokio(
        ResolverConfig::from_parts(None, vec![], group),
        ResolverOpts::default(),
    );

    let name = format!("{SRV_SERVICE}.{domain}.");
    let records = resolver
        .srv_lookup(name.as_str())
        .await
        .map_err(|e| ProtocolError::Resolve(format!("{name}: {e}")))?;
    let record = records
        .iter()
        .next()
        .ok_or_else(|| ProtocolError::Resolve(format!("{name}: no records")))?;

    let target = record.target().clone();
    let port = record.port();
    let ips = resolver
        .lookup_ip(target.clone())
        .await
        .map_err(|e| ProtocolError::Resolve(format!("{target}: {e}")))?;
    let ip = ips
        .iter()
        .next()
        .ok_or_else(|| ProtocolError::Resolve(format!("{target}: no addresses")))?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_address_without_srv() {
        let config = NodeConfig {
            master_address: "10.0.0.1:37420".into(),
            ..NodeConfig::default()
        };
        assert_eq!(master_address(&config).await, "10.0.0.1:37420");
    }

    #[tokio::test]
    async fn bad_nameserver_is_resolve_error() {
        let err = resolve_srv("not-an-address", "wired.rip").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Resolve(_)));
    }

    #[tokio::test]
    async fn srv_failure_falls_back() {
        let config = NodeConfig {
            use_srv: true,
            srv_nameserver: "nameserver".into(),
            master_address: "10.0.0.1:37420".into(),
            ..NodeConfig::default()
        };
        assert_eq!(master_address(&config).await, "10.0.0.1:37420");
    }
}
