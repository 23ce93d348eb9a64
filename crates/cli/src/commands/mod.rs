// CLI command implementations

pub mod capacity;
pub mod registry;
pub mod run;
pub mod signature;
