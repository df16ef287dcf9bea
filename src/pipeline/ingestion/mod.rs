// Outbound call governance: per-source rate limiting, deadlines and retries

pub mod governor;
pub mod rate_limiter;
