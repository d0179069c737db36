pub mod ask;
pub mod feedback;
pub mod games;
pub mod ingest;
pub mod liveness;
pub mod readiness;
