//! Connection-level flood protection
//!
//! Caps total and per-IP connections and rate-limits commands per
//! connection. Repeat offenders get their address banned for a while.
//! Time is passed in so the guard can be driven from tests.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::config::ServerConfig;
use crate::game::constants::net::MAX_MESSAGE_SIZE;

/// Configuration for DoS protection
#[derive(Debug, Clone)]
pub struct DoSConfig {
    pub max_connections_total: usize,
    pub max_connections_per_ip: usize,
    pub max_commands_per_second: u32,
    pub max_message_size: usize,
    pub rate_limit_window: Duration,
    pub ban_duration: Duration,
    /// Rate-limit strikes before the connection is dropped and its IP banned
    pub violations_before_ban: u32,
}

impl Default for DoSConfig {
    fn default() -> Self {
        Self {
            max_connections_total: 5_000,
            max_connections_per_ip: 8,
            max_commands_per_second: 20,
            max_message_size: MAX_MESSAGE_SIZE,
            rate_limit_window: Duration::from_secs(1),
            ban_duration: Duration::from_secs(300),
            violations_before_ban: 5,
        }
    }
}

impl From<&ServerConfig> for DoSConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_connections_total: config.max_connections,
            max_connections_per_ip: config.max_connections_per_ip,
            max_commands_per_second: config.max_commands_per_second,
            ..Default::default()
        }
    }
}

/// Errors from DoS protection checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DoSError {
    #[error("Address is banned")]
    IpBanned,
    #[error("Too many total connections")]
    TooManyConnections,
    #[error("Too many connections from this address")]
    TooManyConnectionsFromIp,
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Too many violations, connection terminated")]
    ViolationLimitExceeded,
}

/// Fixed-window command counter for one connection
#[derive(Debug)]
struct CommandWindow {
    ip: IpAddr,
    count: u32,
    window_start: Instant,
    violations: u32,
}

pub type ConnectionId = u64;

pub struct ConnectionGuard {
    config: DoSConfig,
    per_ip: HashMap<IpAddr, usize>,
    windows: HashMap<ConnectionId, CommandWindow>,
    /// Ban expiry per address
    bans: HashMap<IpAddr, Instant>,
    next_id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(config: DoSConfig) -> Self {
        Self {
            config,
            per_ip: HashMap::new(),
            windows: HashMap::new(),
            bans: HashMap::new(),
            next_id: 1,
        }
    }

    /// Admit a new connection from `ip`
    pub fn admit(&mut self, ip: IpAddr, now: Instant) -> Result<ConnectionId, DoSError> {
        if self.is_banned(ip, now) {
            return Err(DoSError::IpBanned);
        }
        if self.windows.len() >= self.config.max_connections_total {
            return Err(DoSError::TooManyConnections);
        }
        let from_ip = self.per_ip.get(&ip).copied().unwrap_or(0);
        if from_ip >= self.config.max_connections_per_ip {
            return Err(DoSError::TooManyConnectionsFromIp);
        }

        let id = self.next_id;
        self.next_id += 1;
        *self.per_ip.entry(ip).or_insert(0) += 1;
        self.windows.insert(
            id,
            CommandWindow {
                ip,
                count: 0,
                window_start: now,
                violations: 0,
            },
        );
        Ok(id)
    }

    pub fn release(&mut self, id: ConnectionId) {
        let Some(window) = self.windows.remove(&id) else {
            return;
        };
        if let Some(count) = self.per_ip.get_mut(&window.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_ip.remove(&window.ip);
            }
        }
    }

    /// Account for one inbound command of `size` bytes
    pub fn check_command(
        &mut self,
        id: ConnectionId,
        size: usize,
        now: Instant,
    ) -> Result<(), DoSError> {
        if size > self.config.max_message_size {
            return Err(DoSError::MessageTooLarge(size));
        }
        let Some(window) = self.windows.get_mut(&id) else {
            return Ok(());
        };
        if window.violations >= self.config.violations_before_ban {
            return Err(DoSError::ViolationLimitExceeded);
        }

        if now.duration_since(window.window_start) >= self.config.rate_limit_window {
            window.window_start = now;
            window.count = 0;
        }
        window.count += 1;
        if window.count <= self.config.max_commands_per_second {
            return Ok(());
        }

        window.violations += 1;
        if window.violations >= self.config.violations_before_ban {
            let ip = window.ip;
            self.bans.insert(ip, now + self.config.ban_duration);
            tracing::warn!("Banning {} after repeated rate-limit violations", ip);
            return Err(DoSError::ViolationLimitExceeded);
        }
        Err(DoSError::RateLimitExceeded)
    }

    pub fn is_banned(&self, ip: IpAddr, now: Instant) -> bool {
        self.bans.get(&ip).is_some_and(|until| now < *until)
    }

    /// Forget bans that have run out. Returns how many were dropped.
    pub fn prune_bans(&mut self, now: Instant) -> usize {
        let before = self.bans.len();
        self.bans.retain(|_, until| now < *until);
        before - self.bans.len()
    }

    pub fn connection_count(&self) -> usize {
        self.windows.len()
    }

    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.per_ip.get(&ip).copied().unwrap_or(0)
    }
}

impl Default for ConnectionGuard {
    fn default() -> Self {
        Self::new(DoSConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_admit_and_release() {
        let mut guard = ConnectionGuard::default();
        let now = Instant::now();
        let a = guard.admit(ip(1), now).unwrap();
        let b = guard.admit(ip(1), now).unwrap();
        assert_ne!(a, b);
        assert_eq!(guard.connections_from(ip(1)), 2);

        guard.release(a);
        guard.release(a);
        assert_eq!(guard.connection_count(), 1);
        assert_eq!(guard.connections_from(ip(1)), 1);
    }

    #[test]
    fn test_connection_caps() {
        let mut guard = ConnectionGuard::new(DoSConfig {
            max_connections_total: 3,
            max_connections_per_ip: 2,
            ..Default::default()
        });
        let now = Instant::now();
        guard.admit(ip(1), now).unwrap();
        guard.admit(ip(1), now).unwrap();
        assert_eq!(guard.admit(ip(1), now), Err(DoSError::TooManyConnectionsFromIp));

        guard.admit(ip(2), now).unwrap();
        assert_eq!(guard.admit(ip(3), now), Err(DoSError::TooManyConnections));
    }

    #[test]
    fn test_rate_window_resets() {
        let mut guard = ConnectionGuard::new(DoSConfig {
            max_commands_per_second: 2,
            ..Default::default()
        });
        let start = Instant::now();
        let id = guard.admit(ip(1), start).unwrap();

        assert!(guard.check_command(id, 10, start).is_ok());
        assert!(guard.check_command(id, 10, start).is_ok());
        assert_eq!(
            guard.check_command(id, 10, start),
            Err(DoSError::RateLimitExceeded)
        );

        let later = start + Duration::from_secs(1);
        assert!(guard.check_command(id, 10, later).is_ok());
    }

    #[test]
    fn test_oversized_command() {
        let mut guard = ConnectionGuard::default();
        let now = Instant::now();
        let id = guard.admit(ip(1), now).unwrap();
        assert_eq!(
            guard.check_command(id, MAX_MESSAGE_SIZE + 1, now),
            Err(DoSError::MessageTooLarge(MAX_MESSAGE_SIZE + 1))
        );
    }

    #[test]
    fn test_repeat_offender_is_banned() {
        let mut guard = ConnectionGuard::new(DoSConfig {
            max_commands_per_second: 1,
            violations_before_ban: 2,
            ban_duration: Duration::from_secs(60),
            ..Default::default()
        });
        let now = Instant::now();
        let id = guard.admit(ip(7), now).unwrap();

        assert!(guard.check_command(id, 1, now).is_ok());
        assert_eq!(guard.check_command(id, 1, now), Err(DoSError::RateLimitExceeded));
        assert_eq!(
            guard.check_command(id, 1, now),
            Err(DoSError::ViolationLimitExceeded)
        );
        assert!(guard.is_banned(ip(7), now));
        assert_eq!(guard.admit(ip(7), now), Err(DoSError::IpBanned));

        let after = now + Duration::from_secs(61);
        assert_eq!(guard.prune_bans(after), 1);
        assert!(!guard.is_banned(ip(7), after));
    }

    #[test]
    fn test_config_from_server_config() {
        let server = ServerConfig {
            max_connections_per_ip: 3,
            ..Default::default()
        };
        let config = DoSConfig::from(&server);
        assert_eq!(config.max_connections_per_ip, 3);
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }
}
