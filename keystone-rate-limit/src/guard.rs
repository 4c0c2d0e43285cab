//! Guards built on top of the token-bucket backend for the dispatcher's
//! attack-prevention pipeline stage (§4.4 stage 2): general per-principal
//! rate limiting plus a dedicated brute-force counter for `authenticate`.

use std::time::Duration;

use crate::RateLimitRegistry;

/// What a rate-limit bucket is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKeyKind {
    /// Keyed by client IP — used before authentication succeeds.
    Ip(String),
    /// Keyed by authenticated username.
    User(String),
    /// One shared bucket for the whole process.
    Global,
}

impl RateLimitKeyKind {
    fn bucket_key(&self, scope: &str) -> String {
        match self {
            RateLimitKeyKind::Ip(ip) => format!("{scope}:ip:{ip}"),
            RateLimitKeyKind::User(user) => format!("{scope}:user:{user}"),
            RateLimitKeyKind::Global => format!("{scope}:global"),
        }
    }
}

/// A `(max requests, window)` rate-limit policy.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max: u64,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max: u64, window: Duration) -> Self {
        Self { max, window }
    }
}

/// General-purpose guard: one named policy applied to an arbitrary key.
///
/// Dispatcher stage 2 keeps one `RateLimitGuard` per action class (e.g.
/// "mutations", "reads") and checks it before execution proceeds.
#[derive(Clone)]
pub struct RateLimitGuard {
    scope: String,
    policy: RateLimit,
    registry: RateLimitRegistry,
}

impl RateLimitGuard {
    pub fn new(scope: impl Into<String>, policy: RateLimit, registry: RateLimitRegistry) -> Self {
        Self {
            scope: scope.into(),
            policy,
            registry,
        }
    }

    /// `true` if the request identified by `key` is allowed to proceed.
    pub fn allow(&self, key: &RateLimitKeyKind) -> bool {
        self.registry
            .try_acquire(&key.bucket_key(&self.scope), self.policy.max, self.policy.window.as_secs())
    }
}

/// Dedicated brute-force counter for the `authenticate` action: a much
/// tighter, IP-keyed policy than ordinary request rate limiting, applied
/// before credentials are even looked at.
#[derive(Clone)]
pub struct PreAuthRateLimitGuard {
    inner: RateLimitGuard,
}

impl PreAuthRateLimitGuard {
    pub fn new(policy: RateLimit, registry: RateLimitRegistry) -> Self {
        Self {
            inner: RateLimitGuard::new("authenticate", policy, registry),
        }
    }

    /// Default policy: 5 attempts per 60s per source IP.
    pub fn with_defaults(registry: RateLimitRegistry) -> Self {
        Self::new(RateLimit::new(5, Duration::from_secs(60)), registry)
    }

    pub fn allow(&self, client_ip: &str) -> bool {
        self.inner.allow(&RateLimitKeyKind::Ip(client_ip.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_auth_guard_blocks_after_limit() {
        let guard = PreAuthRateLimitGuard::new(RateLimit::new(2, Duration::from_secs(60)), RateLimitRegistry::default());
        assert!(guard.allow("1.2.3.4"));
        assert!(guard.allow("1.2.3.4"));
        assert!(!guard.allow("1.2.3.4"));
    }

    #[test]
    fn different_ips_have_independent_buckets() {
        let guard = PreAuthRateLimitGuard::new(RateLimit::new(1, Duration::from_secs(60)), RateLimitRegistry::default());
        assert!(guard.allow("1.1.1.1"));
        assert!(guard.allow("2.2.2.2"));
    }

    #[test]
    fn general_guard_scopes_are_independent() {
        let registry = RateLimitRegistry::default();
        let reads = RateLimitGuard::new("reads", RateLimit::new(1, Duration::from_secs(60)), registry.clone());
        let writes = RateLimitGuard::new("writes", RateLimit::new(1, Duration::from_secs(60)), registry);
        let key = RateLimitKeyKind::User("alice".into());
        assert!(reads.allow(&key));
        assert!(writes.allow(&key));
        assert!(!reads.allow(&key));
    }
}
