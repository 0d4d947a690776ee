pub mod cli;
pub mod discover;
pub mod driver;
pub mod error;
pub mod fake;
pub mod inspect;
pub mod ports;
pub mod run_args;
pub mod supervisor;

pub use cli::DockerCli;
pub use discover::discover_core;
pub use driver::{ContainerDriver, ContainerSummary, ExecOutput};
pub use error::DriverError;
pub use fake::FakeDriver;
pub use inspect::{inspect_runtime, split_image_tag};
pub use ports::PortIdentifier;
pub use run_args::build_run_args;
pub use supervisor::{quiesce, restart_programs, QuiesceOutcome};
