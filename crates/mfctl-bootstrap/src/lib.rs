//! Bootstrap Orchestrator.
//!
//! Walks a fixed, linear list of provisioning [`Stage`]s against a topology.
//! Each stage is gated on its checkpoint key in the bootstrap status, so a
//! run interrupted at any point resumes where it stopped. Per-node work
//! inside a stage is a scatter/gather barrier over every node; stages
//! themselves run strictly in order.

mod dns;
mod error;
mod fanout;
mod keys;
mod orchestrator;
mod report;
mod stage;

pub use dns::DnsOutcome;
pub use dns::restore_dns_command;
pub use dns::set_dns_command;
pub use error::BootstrapError;
pub use error::Result;
pub use fanout::NodeResult;
pub use fanout::scatter_gather;
pub use keys::ServiceKeypair;
pub use orchestrator::Orchestrator;
pub use report::BootstrapReport;
pub use report::StageOutcome;
pub use report::StageReport;
pub use stage::Stage;
