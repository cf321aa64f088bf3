//! Hard caps that bound memory and protect the server from runaway clients.

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Soft locks one session may hold at once.
pub const MAX_LOCKS_PER_SESSION: usize = 64;

/// Resource watches one session may hold at once.
pub const MAX_WATCHES_PER_SESSION: usize = 32;

/// Default cap on concurrent connections (overridable via env).
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Default soft-lock time-to-live in seconds (overridable via env).
pub const DEFAULT_LOCK_TTL_SECS: u64 = 180;

/// Default reaper tick in seconds (overridable via env).
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 5;
