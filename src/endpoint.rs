use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::error::ZkError;

pub const DEFAULT_PORT: u16 = 2181;

/// Parsed form of `host[:port](,host[:port])*[/chroot]`.
///
/// Hostnames resolve through DNS at parse time; only IPv4 results are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectString {
    pub addrs: Vec<SocketAddr>,
    pub chroot: Option<String>,
}

impl ConnectString {
    pub fn parse(s: &str) -> Result<Self, ZkError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ZkError::InvalidArgument);
        }
        let (hosts, chroot) = match s.find('/') {
            Some(pos) => (&s[..pos], validate_chroot(&s[pos..])?),
            None => (s, None),
        };
        let mut addrs = Vec::new();
        for part in hosts.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(ZkError::InvalidArgument);
            }
            let (host, port) = match part.rsplit_once(':') {
                Some((h, p)) => {
                    let port = p.parse::<u16>().map_err(|_| ZkError::InvalidArgument)?;
                    (h, port)
                }
                None => (part, DEFAULT_PORT),
            };
            addrs.push(resolve_v4(host, port)?);
        }
        Ok(Self { addrs, chroot })
    }
}

fn resolve_v4(host: &str, port: u16) -> Result<SocketAddr, ZkError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !ip.is_ipv4() {
            return Err(ZkError::InvalidArgument);
        }
        return Ok(SocketAddr::new(ip, port));
    }
    // Hostname. Resolve and take the first IPv4 result.
    match (host, port).to_socket_addrs() {
        Ok(mut iter) => match iter.find(|a| a.is_ipv4()) {
            Some(a) => Ok(a),
            None => Err(ZkError::InvalidArgument),
        },
        Err(_) => Err(ZkError::InvalidArgument),
    }
}

/// Validate a chroot path: absolute, no trailing slash, no empty or relative
/// components. `"/"` collapses to no chroot at all.
fn validate_chroot(path: &str) -> Result<Option<String>, ZkError> {
    if path == "/" {
        return Ok(None);
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(ZkError::InvalidArgument);
    }
    for comp in path[1..].split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            return Err(ZkError::InvalidArgument);
        }
        if comp.bytes().any(|b| b == 0) {
            return Err(ZkError::InvalidArgument);
        }
    }
    Ok(Some(path.to_string()))
}

/// Rewrite a client path into its server-side form under the chroot.
pub fn prepend_chroot(chroot: Option<&str>, client_path: &str) -> String {
    match chroot {
        None => client_path.to_string(),
        Some(c) => {
            if client_path == "/" {
                c.to_string()
            } else {
                format!("{}{}", c, client_path)
            }
        }
    }
}

/// Rewrite a server-side path for delivery under the chroot: the prefix is
/// stripped, and a path equal to the chroot itself becomes `/`.
pub fn strip_chroot(chroot: Option<&str>, server_path: &str) -> String {
    let Some(c) = chroot else {
        return server_path.to_string();
    };
    if server_path == c {
        return "/".to_string();
    }
    if let Some(rest) = server_path.strip_prefix(c) {
        return rest.to_string();
    }
    warn!("watch event path {:?} outside of chroot {:?}", server_path, c);
    server_path.to_string()
}

/// One server address with its failure history.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    tried: bool,
}

/// The resolved server list in randomized order, visited round-robin.
///
/// A sweep visits every endpoint at most once; `is_next_available` turning
/// false tells the reconnect controller the sweep is exhausted and a backoff
/// sleep is due before `begin_sweep` starts the next one.
pub struct EndpointSet {
    eps: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointSet {
    pub fn new(mut addrs: Vec<SocketAddr>) -> Self {
        addrs.shuffle(&mut thread_rng());
        let eps = addrs
            .into_iter()
            .map(|addr| Endpoint {
                addr,
                consecutive_failures: 0,
                last_failure_at: None,
                tried: false,
            })
            .collect();
        Self { eps, cursor: 0 }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.eps.len()
    }

    /// Advance the cursor and return the next candidate address.
    pub fn next_candidate(&mut self) -> SocketAddr {
        let i = self.cursor % self.eps.len();
        self.cursor = (self.cursor + 1) % self.eps.len();
        self.eps[i].tried = true;
        self.eps[i].addr
    }

    /// Whether any endpoint is still untried in the current sweep.
    pub fn is_next_available(&self) -> bool {
        self.eps.iter().any(|e| !e.tried)
    }

    pub fn begin_sweep(&mut self) {
        for e in self.eps.iter_mut() {
            e.tried = false;
        }
    }

    pub fn mark_failure(&mut self, addr: &SocketAddr) {
        if let Some(e) = self.eps.iter_mut().find(|e| e.addr == *addr) {
            e.consecutive_failures += 1;
            e.last_failure_at = Some(Instant::now());
        }
    }

    /// A successful handshake resets the endpoint's failure count and opens a
    /// fresh sweep.
    pub fn mark_success(&mut self, addr: &SocketAddr) {
        if let Some(e) = self.eps.iter_mut().find(|e| e.addr == *addr) {
            e.consecutive_failures = 0;
        }
        self.begin_sweep();
    }
}
