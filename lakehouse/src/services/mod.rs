pub mod setup;
pub use setup::{BootstrapSummary, SetupService, session_context};
