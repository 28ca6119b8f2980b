//! Run with:
//!   cargo bench --bench merge_benchmark

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use unitmerge::{
    Attr, ClassDecl, Hoisting, Unit, UnitBuilder, VM, VMCreateInfo, Value,
};

const CLASSES: usize = 32;

/// A library unit with a chain of classes, each extending the previous one,
/// and an entry unit requiring it.
fn build_units(vm: &VM, attrs: Attr) -> Arc<Unit> {
    let mut lib = UnitBuilder::new(vm, "lib.php");
    for i in 0..8 {
        lib.add_function(&format!("fn_{i}"), attrs, true);
    }
    lib.add_class(ClassDecl::new("Class0").attrs(attrs), Hoisting::AlwaysHoistable);
    for i in 1..CLASSES {
        lib.add_class(
            ClassDecl::new(&format!("Class{i}"))
                .extends(&format!("Class{}", i - 1))
                .attrs(attrs),
            Hoisting::AlwaysHoistable,
        );
    }
    let lib = lib.build();

    let mut entry = UnitBuilder::new(vm, "entry.php");
    entry.add_define("APP", Value::str("bench"));
    entry.add_global("counter", Value::Int(0));
    entry.add_require(&lib);
    entry.build()
}

fn run_activation(vm: &VM, unit: &Arc<Unit>) {
    let mut act = vm.new_activation();
    act.require(unit).expect("merge failed");
    black_box(act.lookup_class("Class31"));
}

/// Benchmark 1: plain classes
/// Every activation scans the class chains and checks availability.
fn bench_warm_activation(c: &mut Criterion) {
    let vm = VM::new(VMCreateInfo {
        authoritative: Some(true),
        ..Default::default()
    });
    let unit = build_units(&vm, Attr::empty());

    // warm up: setup runs once, versions get created
    for _ in 0..5 {
        run_activation(&vm, &unit);
    }

    c.bench_function("warm_activation_32_classes", |b| {
        b.iter(|| run_activation(&vm, black_box(&unit)));
    });
}

/// Benchmark 2: unique classes
/// After compaction the lists publish known class versions directly.
fn bench_compacted_activation(c: &mut Criterion) {
    let vm = VM::new(VMCreateInfo {
        authoritative: Some(true),
        ..Default::default()
    });
    let unit = build_units(&vm, Attr::UNIQUE);

    for _ in 0..5 {
        run_activation(&vm, &unit);
    }

    c.bench_function("compacted_activation_32_classes", |b| {
        b.iter(|| run_activation(&vm, black_box(&unit)));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_warm_activation, bench_compacted_activation
}

criterion_main!(benches);
