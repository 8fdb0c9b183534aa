//! Deploy and teardown sequencing

pub mod deploy;
pub mod images;
pub mod report;
pub mod teardown;

pub use deploy::{DeployError, DeployStep, DeploySummary, Deployer};
pub use images::{DockerCli, ImageError, ImageTool};
pub use report::{ReportEntry, RunReport, TeardownPhase};
pub use teardown::Teardown;
