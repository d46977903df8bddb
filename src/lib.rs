pub mod calendar;
pub mod config;
pub mod id_set;
pub mod metrics;
pub mod model;
pub mod moment;
pub mod patterns;
pub mod pipeline;
pub mod queries;
pub mod session;
pub mod store;
