use std::sync::Arc;

use crate::{Activation, Class, Func, MergeResult, Unit};

/// Callbacks into the embedding runtime.
///
/// Autoload hooks return `true` when they did something that may have
/// defined the name (usually requiring another unit); the caller then looks
/// the name up again. Every hook has a no-op default.
pub trait Host: Send + Sync {
    fn autoload_class(&self, _act: &mut Activation, _name: &str) -> bool {
        false
    }

    fn autoload_function(&self, _act: &mut Activation, _name: &str) -> bool {
        false
    }

    fn autoload_constant(&self, _act: &mut Activation, _name: &str) -> bool {
        false
    }

    fn autoload_type(&self, _act: &mut Activation, _name: &str) -> bool {
        false
    }

    /// Executes the top-level code of a unit that is not merge-only.
    fn run_top_level(
        &self,
        _act: &mut Activation,
        _unit: &Arc<Unit>,
    ) -> MergeResult<()> {
        Ok(())
    }

    fn on_define_class(&self, _class: &Arc<Class>) {}

    fn on_define_func(&self, _func: &Arc<Func>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl Host for NoopHost {}
