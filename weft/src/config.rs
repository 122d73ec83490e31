//! Configuration for hub behavior and wire budgets.

use std::time::Duration;

/// Configuration shared by a hub's dispatch, discovery, and correlation
/// machinery.
#[derive(Clone, Debug)]
pub struct FabricConfig {
    /// How long a pending query waits for its reply before rejecting.
    pub reply_timeout: Duration,

    /// Shared deadline for one discovery race across all candidate
    /// resolvers. When it fires the lookup settles to "not found".
    pub discovery_timeout: Duration,

    /// Transport packet-size ceiling in bytes (whole encoded packet).
    pub max_packet_len: usize,

    /// Fixed allowance reserved for the header segment when computing the
    /// per-packet body budget.
    pub header_allowance: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(5000),
            discovery_timeout: Duration::from_millis(5000),
            max_packet_len: 4096,
            header_allowance: 256,
        }
    }
}

impl FabricConfig {
    /// Per-packet body budget: the packet ceiling minus the header
    /// allowance. Bodies longer than this are chunked by the splitter.
    pub fn body_budget(&self) -> usize {
        self.max_packet_len.saturating_sub(self.header_allowance)
    }

    /// Override the reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Override the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Override the transport packet ceiling.
    pub fn with_max_packet_len(mut self, len: usize) -> Self {
        self.max_packet_len = len;
        self
    }

    /// Configuration for chatty local links: short timeouts, small packets.
    pub fn local_link() -> Self {
        Self {
            reply_timeout: Duration::from_millis(1000),
            discovery_timeout: Duration::from_millis(500),
            max_packet_len: 1400,
            header_allowance: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_body_budget() {
        let config = FabricConfig::default();
        assert_eq!(config.body_budget(), 4096 - 256);
    }

    #[test]
    fn test_budget_never_underflows() {
        let config = FabricConfig::default().with_max_packet_len(10);
        assert_eq!(config.body_budget(), 0);
    }

    #[test]
    fn test_builder_overrides() {
        let config = FabricConfig::default()
            .with_reply_timeout(Duration::from_secs(1))
            .with_discovery_timeout(Duration::from_millis(250));
        assert_eq!(config.reply_timeout, Duration::from_secs(1));
        assert_eq!(config.discovery_timeout, Duration::from_millis(250));
    }
}
