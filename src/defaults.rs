//! Built-in defaults shared across services.

/// Dwell applied at each via point when the caller does not specify one.
pub const DEFAULT_VIA_DWELL_SECONDS: u32 = 60;

/// Optimizer time budget when the request omits one.
pub const DEFAULT_TIME_BUDGET_SECONDS: u32 = 60;

/// Provider calls in flight at once, absent configuration.
pub const DEFAULT_MAX_INFLIGHT_ROUTES: usize = 4;

/// Bounded retry attempts for a single provider call.
pub const PROVIDER_RETRY_ATTEMPTS: u32 = 3;
