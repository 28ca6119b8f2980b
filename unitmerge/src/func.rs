use std::{fmt, sync::Arc};

use crate::{Attr, EntityRegistry, Name, NamedEntity};

/// A compiled function. Bodies live in the unit's bytecode; the merge core
/// only needs the declaration.
pub struct Func {
    name: Name,
    attrs: Attr,
    entity: Arc<NamedEntity>,
}

impl Func {
    pub fn new(registry: &EntityRegistry, name: &str, attrs: Attr) -> Self {
        Self {
            name: Name::new(name),
            attrs,
            entity: registry.lookup_or_create(name),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn attrs(&self) -> Attr {
        self.attrs
    }

    pub fn entity(&self) -> &Arc<NamedEntity> {
        &self.entity
    }

    pub fn is_unique(&self) -> bool {
        self.attrs.contains(Attr::UNIQUE)
    }

    pub fn is_persistent(&self) -> bool {
        self.attrs.contains(Attr::PERSISTENT)
    }

    pub fn allows_override(&self) -> bool {
        self.attrs.contains(Attr::ALLOW_OVERRIDE)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("name", &self.name)
            .field("attrs", &self.attrs)
            .finish()
    }
}
