// Observability: metrics facade helpers (logging lives in crate::logging)

pub mod metrics;
