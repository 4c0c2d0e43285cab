/// JWT + permission cache configuration (§6 `jwt.*` / `cache.*` keys).
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Shared HMAC signing secret.
    pub jwt_secret: String,
    /// Expected issuer in the "iss" claim.
    pub jwt_issuer: String,
    /// Token lifetime in seconds.
    pub jwt_expiry_s: i64,
    /// Permission cache TTL, default 5 minutes.
    pub cache_ttl_s: u64,
    /// Permission cache capacity, default 10 000.
    pub cache_capacity: usize,
    /// Expired-entry sweep cadence, default 1 minute.
    pub cache_cleaner_interval_s: u64,
    /// Bounded audit queue capacity.
    pub audit_queue_capacity: usize,
}

impl SecurityConfig {
    pub fn new(jwt_secret: impl Into<String>, jwt_issuer: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            jwt_issuer: jwt_issuer.into(),
            jwt_expiry_s: 86_400,
            cache_ttl_s: 300,
            cache_capacity: 10_000,
            cache_cleaner_interval_s: 60,
            audit_queue_capacity: 4096,
        }
    }

    pub fn with_jwt_expiry(mut self, secs: i64) -> Self {
        self.jwt_expiry_s = secs;
        self
    }

    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_s = secs;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
