pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use config::DaemonConfig;
pub use errors::McpdError;
pub use registry::{Registry, ToolSpec};
pub use router::AggregationRouter;
pub use supervisor::{ProcessSupervisor, SupervisorOptions};
