//! Constants for DAMPER API
//!
//! Default values for server, storage and background job settings.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Header carrying the caller's API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Version prefix for governed routes
pub const API_PREFIX: &str = "/api/v1/governed";

/// Wall-clock limit for one request, batches included
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// STORAGE
// ============================================================================

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// CACHE SWEEP JOB
// ============================================================================

/// Default interval between cache sweeps (5 minutes)
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 300;
