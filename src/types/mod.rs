mod level;
mod models;

pub use level::{FlagBundle, Level, MinimumLevel, Operation, derive_level, set_level};
pub use models::*;
