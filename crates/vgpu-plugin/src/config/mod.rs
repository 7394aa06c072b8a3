pub mod cli;
pub mod daemon;
pub mod plugin;

pub use cli::*;
pub use daemon::*;
pub use plugin::*;
