//! Server workflow configuration.

use rowsync_protocol::ConflictResolutionPolicy;

/// Configuration for the server-side workflows.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Conflict resolution policy applied during upload reconciliation.
    pub policy: ConflictResolutionPolicy,
    /// Maximum download batch size in KiB.
    pub max_batch_kib: usize,
    /// Maximum rows accepted in a single uploaded change set.
    pub max_upload_rows: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            policy: ConflictResolutionPolicy::ServerWins,
            max_batch_kib: 512,
            max_upload_rows: 10_000,
        }
    }
}

impl ServerConfig {
    /// Sets the conflict resolution policy.
    pub fn with_policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the maximum download batch size in KiB.
    pub fn with_max_batch_kib(mut self, kib: usize) -> Self {
        self.max_batch_kib = kib;
        self
    }

    /// Sets the maximum rows accepted per uploaded change set.
    pub fn with_max_upload_rows(mut self, rows: usize) -> Self {
        self.max_upload_rows = rows;
        self
    }

    /// Maximum download batch size in bytes.
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_kib * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = ServerConfig::default();
        assert_eq!(config.policy, ConflictResolutionPolicy::ServerWins);
        assert_eq!(config.max_batch_bytes(), 512 * 1024);

        let config = ServerConfig::default()
            .with_policy(ConflictResolutionPolicy::ClientWins)
            .with_max_batch_kib(64)
            .with_max_upload_rows(100);
        assert_eq!(config.policy, ConflictResolutionPolicy::ClientWins);
        assert_eq!(config.max_batch_kib, 64);
        assert_eq!(config.max_upload_rows, 100);
    }
}
