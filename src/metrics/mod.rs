pub mod gateway;

pub use gateway::MetricsGateway;
