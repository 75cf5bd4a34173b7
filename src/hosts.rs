//! # Hosts
//!
//! Expansion of user-supplied host strings into the endpoint list the pool
//! round-robins over.
//!
//! Accepted forms: `host` (default port 21), `host:port`, `[v6addr]:port`
//! and bare addresses. Hostnames expand to every A record they resolve to
//! (AAAA records too when IPv6 lookup is enabled).

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::regex::HOST_PORT_RE;
use crate::types::{FtpError, FtpResult};

const DEFAULT_PORT: u16 = 21;

pub(crate) fn lookup_hosts(hosts: &[String], ipv6_lookup: bool) -> FtpResult<Vec<SocketAddr>> {
    if hosts.is_empty() {
        return Err(FtpError::InvalidHost(
            "must specify at least one host".to_string(),
        ));
    }

    let mut endpoints = Vec::new();
    for host in hosts {
        expand_host(host, ipv6_lookup, &mut endpoints)?;
    }

    Ok(endpoints)
}

fn expand_host(host: &str, ipv6_lookup: bool, endpoints: &mut Vec<SocketAddr>) -> FtpResult<()> {
    let (name, port) = split_host_port(host)?;

    // bare address: no lookup needed
    if let Ok(ip) = name.parse::<IpAddr>() {
        endpoints.push(SocketAddr::new(ip, port));
        return Ok(());
    }

    let resolved = (name, port)
        .to_socket_addrs()
        .map_err(|e| FtpError::InvalidHost(format!("error resolving host {name:?}: {e}")))?;

    let before = endpoints.len();
    endpoints.extend(resolved.filter(|addr| ipv6_lookup || addr.is_ipv4()));
    if endpoints.len() == before {
        return Err(FtpError::InvalidHost(format!(
            "host {name:?} did not resolve to any usable address"
        )));
    }

    Ok(())
}

/// Split `host[:port]` into its parts, unwrapping IPv6 brackets.
fn split_host_port(host: &str) -> FtpResult<(&str, u16)> {
    if !HOST_PORT_RE.is_match(host) {
        let name = host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(host);
        if name.is_empty() {
            return Err(FtpError::InvalidHost(host.to_string()));
        }
        return Ok((name, DEFAULT_PORT));
    }

    let (name, port) = match host.rsplit_once(':') {
        Some(parts) => parts,
        None => return Err(FtpError::InvalidHost(host.to_string())),
    };
    let port: u16 = port
        .parse()
        .map_err(|_| FtpError::InvalidHost(host.to_string()))?;
    let name = name
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(name);
    if name.is_empty() {
        return Err(FtpError::InvalidHost(host.to_string()));
    }

    Ok((name, port))
}
