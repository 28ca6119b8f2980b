//! Class, function, typedef and alias definition.

use std::sync::Arc;

use crate::{
    Activation, Avail, Cell, Class, Func, MergeError, MergeResult, NameDef,
    PreClass, TypeKind, Typedef, Warning,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefineMode {
    /// Optimistic: never autoloads and never raises, a failure is `Ok(None)`.
    Probe,
    /// Autoloads missing dependencies and raises on failure.
    Fatal,
}

fn probe_or_fatal<T>(
    mode: DefineMode,
    error: impl FnOnce() -> MergeError,
) -> MergeResult<Option<T>> {
    match mode {
        DefineMode::Probe => Ok(None),
        DefineMode::Fatal => Err(error()),
    }
}

fn same_head(a: &Option<Arc<Class>>, b: &Option<Arc<Class>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl Activation {
    /// Finds or creates the version of `pre` usable in this activation and
    /// makes it visible.
    ///
    /// Existing versions in the entity's chain are reused when their parent
    /// and interfaces are the ones visible now. Otherwise a new version is
    /// linked at the head of the chain; if another thread linked one first
    /// the chain is scanned again.
    pub fn define_class(
        &mut self,
        pre: &Arc<PreClass>,
        mode: DefineMode,
    ) -> MergeResult<Option<Arc<Class>>> {
        let entity = pre.entity().clone();
        let fatal = mode == DefineMode::Fatal;

        if self.cached_name_def(&entity).is_some() {
            return probe_or_fatal(mode, || {
                MergeError::NameInUse(pre.name().clone())
            });
        }

        if let Some(cached) = self.cached_class(&entity) {
            if Arc::ptr_eq(cached.pre_class(), pre) {
                return Ok(Some(cached));
            }
            return probe_or_fatal(mode, || {
                MergeError::ClassRedeclared(pre.name().clone())
            });
        }

        let mut parent_hint = None;
        loop {
            let head = entity.class_list();

            let mut chain = head.clone();
            while let Some(class) = chain {
                if Arc::ptr_eq(class.pre_class(), pre) {
                    match class.avail(self, &mut parent_hint, fatal) {
                        Avail::True => {
                            self.publish_class(&class);
                            return Ok(Some(class));
                        }
                        Avail::False => {}
                        Avail::Fail(missing) => {
                            return probe_or_fatal(mode, || {
                                MergeError::UnknownClass(missing)
                            });
                        }
                    }
                }
                chain = class.next().cloned();
            }

            let parent = match pre.parent() {
                None => None,
                Some(name) => {
                    if parent_hint.is_none() {
                        parent_hint = self.get_class(name, fatal);
                    }
                    match &parent_hint {
                        Some(parent) => Some(parent.clone()),
                        None => {
                            return probe_or_fatal(mode, || {
                                MergeError::UnknownClass(name.clone())
                            });
                        }
                    }
                }
            };

            let mut interfaces = Vec::with_capacity(pre.interfaces().len());
            for name in pre.interfaces() {
                match self.get_class(name, fatal) {
                    Some(interface) => interfaces.push(interface),
                    None => {
                        return probe_or_fatal(mode, || {
                            MergeError::UnknownClass(name.clone())
                        });
                    }
                }
            }

            if let Err(error) = check_dependencies(pre, parent.as_ref(), &interfaces)
            {
                return probe_or_fatal(mode, || error);
            }

            let vm = self.vm().clone();
            let class = {
                let _guard = vm.classes_lock.lock();
                let current = entity.class_list();
                if !same_head(&head, &current) {
                    log::trace!("class {}: chain moved, rescanning", pre.name());
                    continue;
                }

                let persistent = vm.settings().authoritative
                    && pre.is_persistent()
                    && parent.as_ref().is_none_or(|p| p.is_persistent())
                    && interfaces.iter().all(|i| i.is_persistent());
                let slot = entity.class_slot_or_init(vm.slots(), persistent);
                let class = Arc::new(Class::new(
                    pre.clone(),
                    parent.as_ref(),
                    &interfaces,
                    slot,
                    current,
                ));
                entity.push_class(class.clone());
                class
            };

            log::debug!(
                "class {} defined from {} (persistent: {})",
                class.name(),
                pre.unit_path(),
                class.is_persistent()
            );
            self.publish_class(&class);
            return Ok(Some(class));
        }
    }

    /// Publishes a function, refusing to replace a different one unless the
    /// existing function allows it.
    pub fn define_func(&mut self, func: &Arc<Func>) -> MergeResult<()> {
        let handle = self.vm().func_slot(func);
        if let Some(existing) = self.load_slot(handle).into_func() {
            if Arc::ptr_eq(&existing, func) {
                return Ok(());
            }
            if !existing.allows_override() {
                return Err(MergeError::FunctionRedeclared(func.name().clone()));
            }
        }
        self.publish_func(func);
        Ok(())
    }

    /// Binds a type alias in this activation.
    ///
    /// Aliases of object types resolve their target now: to the class of that
    /// name, otherwise to the target's own typedef binding.
    pub fn define_typedef(&mut self, typedef: &Arc<Typedef>) -> MergeResult<NameDef> {
        let entity = typedef.entity().clone();

        if let Some(current) = self.cached_name_def(&entity) {
            let compatible = match &current {
                NameDef::Typedef(existing) => existing.is_compatible(typedef),
                NameDef::Class(class) => {
                    if typedef.kind() == TypeKind::Object
                        && !class.name().same(typedef.value())
                    {
                        return Err(MergeError::TypedefClassConflict {
                            name: typedef.name().clone(),
                            existing: class.name().clone(),
                        });
                    }
                    typedef.kind() == TypeKind::Object
                }
            };
            if !compatible {
                return Err(MergeError::TypedefConflict(typedef.name().clone()));
            }
            return Ok(current);
        }

        // an object alias may name the class it aliases
        if let Some(class) = self.cached_class(&entity) {
            if typedef.kind() != TypeKind::Object
                || !class.name().same(typedef.value())
            {
                return Err(MergeError::NameIsClass(typedef.name().clone()));
            }
        }

        let slot = entity.name_def_slot_or_init(self.vm().slots());
        let resolved = if typedef.kind() != TypeKind::Object {
            NameDef::Typedef(typedef.clone())
        } else if let Some(class) = self.load_class(typedef.value()) {
            NameDef::Class(class)
        } else if let Some(target) = self.load_name_def(typedef.value()) {
            target
        } else {
            return Err(MergeError::UnknownType(typedef.value().clone()));
        };

        let cell = match &resolved {
            NameDef::Class(class) => Cell::Class(class.clone()),
            NameDef::Typedef(typedef) => Cell::Typedef(typedef.clone()),
        };
        self.store_slot(slot, cell);
        log::trace!("typedef {} bound", typedef.name());
        Ok(resolved)
    }

    fn load_name_def(&mut self, name: &str) -> Option<NameDef> {
        let registry_lookup = |act: &Activation| {
            let entity = act.vm().registry().get(name)?;
            act.cached_name_def(&entity)
        };
        if let Some(found) = registry_lookup(self) {
            return Some(found);
        }
        let host = self.vm().host().clone();
        if host.autoload_type(self, name) {
            registry_lookup(self)
        } else {
            None
        }
    }

    /// Makes `original` visible under `alias` as well. Returns false, with a
    /// warning, if a class of that name is already visible.
    pub fn alias_class(&mut self, original: &Arc<Class>, alias: &str) -> bool {
        let entity = self.vm().registry().lookup_or_create(alias);
        if self.cached_class(&entity).is_some() {
            self.raise_warning(Warning::ClassRedeclared(entity.name().clone()));
            return false;
        }
        let slot = entity.class_slot_or_init(self.vm().slots(), false);
        self.store_slot(slot, Cell::Class(original.clone()));
        true
    }
}

fn check_dependencies(
    pre: &PreClass,
    parent: Option<&Arc<Class>>,
    interfaces: &[Arc<Class>],
) -> MergeResult<()> {
    if let Some(parent) = parent {
        let kind = if parent.is_interface() {
            Some("interface")
        } else if parent.is_trait() {
            Some("trait")
        } else {
            None
        };
        if let Some(kind) = kind {
            return Err(MergeError::InvalidParent {
                class: pre.name().clone(),
                parent: parent.name().clone(),
                kind,
            });
        }
        if parent.is_final() {
            return Err(MergeError::FinalParent {
                class: pre.name().clone(),
                parent: parent.name().clone(),
            });
        }
    }
    for interface in interfaces {
        if !interface.is_interface() {
            return Err(MergeError::NotAnInterface {
                class: pre.name().clone(),
                interface: interface.name().clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Attr, ClassDecl, Hoisting, Host, UnitBuilder, VM, VMCreateInfo,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn vm() -> VM {
        VM::new(VMCreateInfo::default())
    }

    fn pre_class(vm: &VM, decl: ClassDecl) -> Arc<PreClass> {
        let mut b = UnitBuilder::new(vm, "decl.php");
        b.add_class(decl, Hoisting::NotHoistable)
    }

    #[test]
    fn same_blueprint_is_idempotent() {
        let vm = vm();
        let mut act = vm.new_activation();
        let pre = pre_class(&vm, ClassDecl::new("Point"));

        let first = act.define_class(&pre, DefineMode::Fatal).unwrap().unwrap();
        let second = act.define_class(&pre, DefineMode::Fatal).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pre.entity().classes().count(), 1);
    }

    #[test]
    fn different_blueprint_same_name_is_fatal() {
        let vm = vm();
        let mut act = vm.new_activation();
        let a = pre_class(&vm, ClassDecl::new("Dup"));
        let b = pre_class(&vm, ClassDecl::new("DUP"));

        act.define_class(&a, DefineMode::Fatal).unwrap();
        assert!(matches!(act.define_class(&b, DefineMode::Probe), Ok(None)));
        assert_eq!(
            act.define_class(&b, DefineMode::Fatal).unwrap_err(),
            MergeError::ClassRedeclared("DUP".into())
        );
    }

    #[test]
    fn versions_are_reused_across_activations() {
        let vm = vm();
        let base = pre_class(&vm, ClassDecl::new("Base"));
        let child = pre_class(&vm, ClassDecl::new("Child").extends("Base"));

        let mut first = vm.new_activation();
        first.define_class(&base, DefineMode::Fatal).unwrap();
        let c1 = first.define_class(&child, DefineMode::Fatal).unwrap().unwrap();

        let mut second = vm.new_activation();
        assert!(second.lookup_class("Child").is_none());
        second.define_class(&base, DefineMode::Fatal).unwrap();
        let c2 = second.define_class(&child, DefineMode::Fatal).unwrap().unwrap();

        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(child.entity().classes().count(), 1);
    }

    #[test]
    fn new_parent_version_creates_new_child_version() {
        let vm = vm();
        let base_a = pre_class(&vm, ClassDecl::new("Root"));
        let base_b = pre_class(&vm, ClassDecl::new("Root"));
        let leaf = pre_class(&vm, ClassDecl::new("Leaf").extends("Root"));

        let mut first = vm.new_activation();
        first.define_class(&base_a, DefineMode::Fatal).unwrap();
        let l1 = first.define_class(&leaf, DefineMode::Fatal).unwrap().unwrap();

        let mut second = vm.new_activation();
        let root_b = second
            .define_class(&base_b, DefineMode::Fatal)
            .unwrap()
            .unwrap();
        let l2 = second.define_class(&leaf, DefineMode::Fatal).unwrap().unwrap();

        assert!(!Arc::ptr_eq(&l1, &l2));
        assert!(Arc::ptr_eq(&l2.parent().unwrap(), &root_b));
        assert_eq!(leaf.entity().classes().count(), 2);
        assert!(l1.is_cached(&first));
        assert!(!l1.is_cached(&second));
    }

    #[test]
    fn missing_parent_probes_quietly() {
        let vm = vm();
        let mut act = vm.new_activation();
        let orphan = pre_class(&vm, ClassDecl::new("Orphan").extends("Nobody"));

        assert!(matches!(
            act.define_class(&orphan, DefineMode::Probe),
            Ok(None)
        ));
        assert_eq!(
            act.define_class(&orphan, DefineMode::Fatal).unwrap_err(),
            MergeError::UnknownClass("Nobody".into())
        );
        assert!(orphan.entity().class_list().is_none());
    }

    #[test]
    fn parent_and_interface_kinds_are_checked() {
        let vm = vm();
        let mut act = vm.new_activation();
        let sealed =
            pre_class(&vm, ClassDecl::new("Sealed").attrs(Attr::FINAL));
        let iface =
            pre_class(&vm, ClassDecl::new("Shape").attrs(Attr::INTERFACE));
        let sub = pre_class(&vm, ClassDecl::new("Sub").extends("Sealed"));
        let bad = pre_class(&vm, ClassDecl::new("Bad").extends("Shape"));
        let fake = pre_class(&vm, ClassDecl::new("Fake").implements("Sealed"));
        let good = pre_class(&vm, ClassDecl::new("Square").implements("\\Shape"));

        act.define_class(&sealed, DefineMode::Fatal).unwrap();
        act.define_class(&iface, DefineMode::Fatal).unwrap();

        assert!(matches!(
            act.define_class(&sub, DefineMode::Fatal),
            Err(MergeError::FinalParent { .. })
        ));
        assert!(matches!(
            act.define_class(&bad, DefineMode::Fatal),
            Err(MergeError::InvalidParent { kind: "interface", .. })
        ));
        assert!(matches!(
            act.define_class(&fake, DefineMode::Fatal),
            Err(MergeError::NotAnInterface { .. })
        ));
        let square = act.define_class(&good, DefineMode::Fatal).unwrap().unwrap();
        assert_eq!(square.interfaces().count(), 1);
        assert!(act.class_exists("square", false));
        assert!(!act.class_exists("Shape", false));
    }

    #[test]
    fn redefining_a_function_is_fatal_unless_overridable() {
        let vm = vm();
        let mut act = vm.new_activation();
        let mut b = UnitBuilder::new(&vm, "funcs.php");
        let builtin = b.add_function("strlen", Attr::ALLOW_OVERRIDE, false);
        let user = b.add_function("STRLEN", Attr::empty(), false);
        let other = b.add_function("strlen", Attr::empty(), false);

        act.define_func(&builtin).unwrap();
        act.define_func(&user).unwrap();
        act.define_func(&user).unwrap();
        assert!(Arc::ptr_eq(&act.lookup_func("strlen").unwrap(), &user));
        assert_eq!(
            act.define_func(&other),
            Err(MergeError::FunctionRedeclared("strlen".into()))
        );
    }

    #[test]
    fn typedefs_conflict_with_classes_and_each_other() {
        let vm = vm();
        let mut act = vm.new_activation();
        let mut b = UnitBuilder::new(&vm, "types.php");
        let target = b.add_class(ClassDecl::new("Target"), Hoisting::NotHoistable);
        let other = b.add_class(ClassDecl::new("Other"), Hoisting::NotHoistable);
        let taken = b.add_class(ClassDecl::new("Taken"), Hoisting::NotHoistable);
        let id = b.add_typedef("Id", TypeKind::Int, "int");
        let id_again = b.add_typedef("Id", TypeKind::String, "string");
        let alias = b.add_typedef("Alias", TypeKind::Object, "Target");
        let alias_other = b.add_typedef("Alias", TypeKind::Object, "Other");
        let clash = b.add_typedef("Taken", TypeKind::Int, "int");
        let dangling = b.add_typedef("Dangling", TypeKind::Object, "Missing");
        let shadow = b.add_class(ClassDecl::new("Id"), Hoisting::NotHoistable);

        act.define_class(&target, DefineMode::Fatal).unwrap();
        act.define_class(&other, DefineMode::Fatal).unwrap();
        act.define_class(&taken, DefineMode::Fatal).unwrap();

        assert!(matches!(act.define_typedef(&id), Ok(NameDef::Typedef(_))));
        assert!(matches!(act.define_typedef(&id), Ok(NameDef::Typedef(_))));
        assert_eq!(
            act.define_typedef(&id_again).unwrap_err(),
            MergeError::TypedefConflict("Id".into())
        );

        let resolved = act.define_typedef(&alias).unwrap();
        assert!(matches!(resolved, NameDef::Class(ref c) if c.name().same("target")));
        assert!(matches!(
            act.define_typedef(&alias_other),
            Err(MergeError::TypedefClassConflict { .. })
        ));

        assert_eq!(
            act.define_typedef(&clash).unwrap_err(),
            MergeError::NameIsClass("Taken".into())
        );
        assert_eq!(
            act.define_typedef(&dangling).unwrap_err(),
            MergeError::UnknownType("Missing".into())
        );
        assert_eq!(
            act.define_class(&shadow, DefineMode::Fatal).unwrap_err(),
            MergeError::NameInUse("Id".into())
        );
    }

    #[test]
    fn persistent_class_needs_persistent_interfaces() {
        let vm = VM::new(VMCreateInfo {
            authoritative: Some(true),
            ..Default::default()
        });
        let iface = pre_class(
            &vm,
            ClassDecl::new("Iface").attrs(Attr::INTERFACE | Attr::UNIQUE),
        );
        let imp = pre_class(
            &vm,
            ClassDecl::new("Impl")
                .implements("Iface")
                .attrs(Attr::UNIQUE | Attr::PERSISTENT),
        );
        let root = pre_class(
            &vm,
            ClassDecl::new("Root").attrs(Attr::UNIQUE | Attr::PERSISTENT),
        );

        let mut first = vm.new_activation();
        first.define_class(&iface, DefineMode::Fatal).unwrap();
        let imp = first.define_class(&imp, DefineMode::Fatal).unwrap().unwrap();
        let root = first.define_class(&root, DefineMode::Fatal).unwrap().unwrap();
        assert!(!imp.is_persistent());
        assert!(root.is_persistent());

        let second = vm.new_activation();
        assert!(second.lookup_class("Iface").is_none());
        assert!(second.lookup_class("Impl").is_none());
        assert!(second.lookup_class("Root").is_some());
    }

    /// Counts type autoload requests and never finds anything.
    #[derive(Default)]
    struct TypeCountingHost {
        type_loads: AtomicUsize,
    }

    impl Host for TypeCountingHost {
        fn autoload_type(&self, _act: &mut Activation, _name: &str) -> bool {
            self.type_loads.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn object_typedefs_resolve_classes_first() {
        let host = Arc::new(TypeCountingHost::default());
        let vm = VM::with_host(VMCreateInfo::default(), host.clone());
        let mut act = vm.new_activation();
        let mut b = UnitBuilder::new(&vm, "widgets.php");
        let widget = b.add_class(ClassDecl::new("Widget"), Hoisting::NotHoistable);
        let short = b.add_typedef("W", TypeKind::Object, "Widget");
        let itself = b.add_typedef("widget", TypeKind::Object, "WIDGET");
        let mismatch = b.add_typedef("Widget", TypeKind::Object, "Gadget");

        let widget = act.define_class(&widget, DefineMode::Fatal).unwrap().unwrap();

        let resolved = act.define_typedef(&short).unwrap();
        assert!(matches!(resolved, NameDef::Class(ref c) if Arc::ptr_eq(c, &widget)));
        assert_eq!(host.type_loads.load(Ordering::SeqCst), 0);

        let resolved = act.define_typedef(&itself).unwrap();
        assert!(matches!(resolved, NameDef::Class(ref c) if Arc::ptr_eq(c, &widget)));
        assert!(Arc::ptr_eq(&act.lookup_class("Widget").unwrap(), &widget));
        assert!(matches!(
            act.define_typedef(&mismatch),
            Err(MergeError::TypedefClassConflict { .. })
        ));
    }

    #[test]
    fn aliasing_an_existing_name_warns() {
        let vm = vm();
        let mut act = vm.new_activation();
        let mut b = UnitBuilder::new(&vm, "alias.php");
        let model = b.add_class(ClassDecl::new("Model"), Hoisting::NotHoistable);
        let record = b.add_class(ClassDecl::new("Record"), Hoisting::NotHoistable);

        let model = act.define_class(&model, DefineMode::Fatal).unwrap().unwrap();
        act.define_class(&record, DefineMode::Fatal).unwrap();

        assert!(act.alias_class(&model, "Entity"));
        assert!(Arc::ptr_eq(&act.lookup_class("entity").unwrap(), &model));

        assert!(!act.alias_class(&model, "Record"));
        assert_eq!(
            act.warnings(),
            [Warning::ClassRedeclared("Record".into())]
        );
    }
}
