//! Run configuration: a mutable draft builder producing an immutable value.
//!
//! Configuration is two-phase by construction: [`SyncConfigBuilder`] is the
//! draft, freely mutable before a run starts, and [`SyncConfig`] is the
//! frozen value a run consumes. Nothing can mutate a configuration while a
//! run is in flight, so no runtime lock is needed.

use rowsync_protocol::ConflictResolutionPolicy;

/// Serialization format the transport should negotiate.
///
/// The core never encodes entities itself; the session hands the
/// configuration to the transport on every call, and the transport
/// encodes accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Feed-style XML payloads.
    #[default]
    Atom,
    /// JSON payloads.
    Json,
}

/// Immutable configuration consumed by one or more runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    policy: ConflictResolutionPolicy,
    format: SerializationFormat,
    max_batch_kib: usize,
    tables: Vec<String>,
}

impl SyncConfig {
    /// Starts a draft configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Conflict resolution policy.
    pub fn policy(&self) -> ConflictResolutionPolicy {
        self.policy
    }

    /// Selected serialization format.
    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    /// Maximum batch size in KiB.
    pub fn max_batch_kib(&self) -> usize {
        self.max_batch_kib
    }

    /// Maximum batch size in bytes.
    pub fn max_batch_bytes(&self) -> usize {
        self.max_batch_kib * 1024
    }

    /// Table names in apply order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

/// Draft configuration; mutable until [`SyncConfigBuilder::build`] freezes
/// it into a [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncConfigBuilder {
    policy: ConflictResolutionPolicy,
    format: SerializationFormat,
    max_batch_kib: usize,
    tables: Vec<String>,
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self {
            policy: ConflictResolutionPolicy::ServerWins,
            format: SerializationFormat::default(),
            max_batch_kib: 512,
            tables: Vec::new(),
        }
    }
}

impl SyncConfigBuilder {
    /// Sets the conflict resolution policy.
    pub fn policy(mut self, policy: ConflictResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the serialization format.
    pub fn format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the maximum batch size in KiB.
    pub fn max_batch_kib(mut self, kib: usize) -> Self {
        self.max_batch_kib = kib;
        self
    }

    /// Appends a table to the apply order.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.tables.push(name.into());
        self
    }

    /// Appends several tables to the apply order.
    pub fn tables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(names.into_iter().map(Into::into));
        self
    }

    /// Freezes the draft into an immutable configuration.
    pub fn build(self) -> SyncConfig {
        SyncConfig {
            policy: self.policy,
            format: self.format,
            max_batch_kib: self.max_batch_kib,
            tables: self.tables,
        }
    }
}
