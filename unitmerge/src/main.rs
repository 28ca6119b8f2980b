use clap::Parser as ClapParser;
use std::{collections::HashMap, process, sync::Arc, thread};

use parking_lot::Mutex;
use unitmerge::{
    Activation, Attr, ClassDecl, DefineMode, Hoisting, Host, MergeResult,
    Unit, UnitBuilder, UnitId, VM, VMCreateInfo, Value,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker threads running activations
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Activations per worker
    #[arg(long, default_value_t = 16)]
    requests: usize,

    /// Whole-program mode: trust unique and persistent attributes
    #[arg(long)]
    authoritative: bool,

    /// Print every unit's declaration list before and after the run
    #[arg(long)]
    dump: bool,
}

type TopLevel = Arc<dyn Fn(&mut Activation) -> MergeResult<()> + Send + Sync>;

/// Stands in for the interpreter: top-level code is a closure per unit.
#[derive(Default)]
struct DemoHost {
    scripts: Mutex<HashMap<UnitId, TopLevel>>,
    classes: Mutex<HashMap<String, Arc<Unit>>>,
}

impl Host for DemoHost {
    fn autoload_class(&self, act: &mut Activation, name: &str) -> bool {
        let unit = self.classes.lock().get(&name.to_ascii_lowercase()).cloned();
        match unit {
            Some(unit) => {
                log::debug!("autoloading {name} from {}", unit.path());
                act.require(&unit).is_ok()
            }
            None => false,
        }
    }

    fn run_top_level(
        &self,
        act: &mut Activation,
        unit: &Arc<Unit>,
    ) -> MergeResult<()> {
        let script = self.scripts.lock().get(&unit.id()).cloned();
        match script {
            Some(script) => script(act),
            None => Ok(()),
        }
    }
}

struct Program {
    units: Vec<Arc<Unit>>,
    entry: Arc<Unit>,
}

fn build_program(vm: &VM, host: &DemoHost) -> Program {
    let mut base = UnitBuilder::new(vm, "lib/base.php");
    base.add_function("helper", Attr::UNIQUE | Attr::PERSISTENT, true);
    base.add_class(
        ClassDecl::new("Renderable").attrs(Attr::INTERFACE | Attr::UNIQUE),
        Hoisting::AlwaysHoistable,
    );
    base.add_class(
        ClassDecl::new("Base").attrs(Attr::UNIQUE | Attr::PERSISTENT),
        Hoisting::AlwaysHoistable,
    );
    base.add_class(
        ClassDecl::new("Child")
            .extends("Base")
            .implements("Renderable")
            .attrs(Attr::UNIQUE),
        Hoisting::AlwaysHoistable,
    );
    let base = base.build();
    host.classes.lock().insert("child".into(), base.clone());

    let mut config = UnitBuilder::new(vm, "config.php");
    config.add_define("VERSION", Value::str("1.0"));
    config.add_persistent_define("BUILD", Value::Int(42));
    config.add_global("env", Value::str("prod"));
    config.add_require(&base);
    let config = config.build();
    {
        let base = base.clone();
        host.scripts.lock().insert(
            config.id(),
            Arc::new(move |act: &mut Activation| {
                act.define_constant("VERSION", Value::str("1.0"));
                act.define_constant("BUILD", Value::Int(42));
                act.assign_global(&Arc::from("env"), &Value::str("prod"));
                act.require(&base).map(|_| ())
            }),
        );
    }

    let mut index = UnitBuilder::new(vm, "index.php");
    index.add_require(&config);
    let controller = index.add_class(
        ClassDecl::new("Controller").extends("Child").attrs(Attr::UNIQUE),
        Hoisting::Mergeable,
    );
    let index = index.build();
    {
        let config = config.clone();
        host.scripts.lock().insert(
            index.id(),
            Arc::new(move |act: &mut Activation| {
                act.require(&config)?;
                act.define_class(&controller, DefineMode::Fatal).map(|_| ())
            }),
        );
    }

    Program {
        units: vec![base, config, index.clone()],
        entry: index,
    }
}

fn dump_units(units: &[Arc<Unit>]) {
    for unit in units {
        println!(
            "== {} (merge_only: {}, state: {:?}) ==",
            unit.path(),
            unit.is_merge_only(),
            unit.merge_state()
        );
        print!("{}", unit.merge_info());
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let host = Arc::new(DemoHost::default());
    let vm = VM::with_host(
        VMCreateInfo {
            authoritative: Some(cli.authoritative),
            ..Default::default()
        },
        host.clone(),
    );
    let program = build_program(&vm, &host);

    if cli.dump {
        dump_units(&program.units);
    }

    let mut workers = Vec::with_capacity(cli.threads);
    for i in 0..cli.threads {
        let vm = vm.clone();
        let entry = program.entry.clone();
        let requests = cli.requests;
        let spawned = thread::Builder::new()
            .name(format!("activation-worker-{i}"))
            .spawn(move || {
                let mut failures = 0usize;
                for _ in 0..requests {
                    let mut act = vm.new_activation();
                    if let Err(err) = act.require(&entry) {
                        log::error!("activation {}: {err}", act.id());
                        failures += 1;
                        continue;
                    }
                    if act.lookup_class("Controller").is_none() {
                        log::error!("activation {}: Controller missing", act.id());
                        failures += 1;
                    }
                }
                failures
            });
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(err) => {
                eprintln!("Error spawning worker {i}: {err}");
                process::exit(1);
            }
        }
    }

    let mut failures = 0;
    for worker in workers {
        match worker.join() {
            Ok(count) => failures += count,
            Err(_) => {
                eprintln!("Error: worker panicked");
                process::exit(1);
            }
        }
    }

    if cli.dump {
        dump_units(&program.units);
    }

    println!("entities: {}", vm.entity_count());
    println!(
        "slots: {} request, {} persistent",
        vm.slots().request_slots(),
        vm.slots().persistent_slots()
    );
    println!("{:#?}", vm.stats());

    if failures > 0 {
        eprintln!("{failures} activations failed");
        process::exit(1);
    }
}
