mod activation;
mod attrs;
mod class;
mod compact;
mod define;
mod error;
mod func;
mod host;
mod merge;
mod mergeable;
mod names;
mod registry;
mod slots;
mod stats;
mod unit;
mod value;
mod vm;

pub use activation::*;
pub use attrs::*;
pub use class::*;
pub use compact::Replacement;
pub use define::DefineMode;
pub use error::*;
pub use func::*;
pub use host::*;
pub use mergeable::*;
pub use names::{Name, normalize_ns};
pub use registry::*;
pub use slots::*;
pub use stats::{MergeStats, MergeStatsSnapshot};
pub use unit::*;
pub use value::*;
pub use vm::*;
