//! CLI command handling

pub mod bench;
pub mod output;
pub mod probe;
pub mod run;

pub use bench::*;
pub use output::*;
pub use probe::*;
pub use run::*;
