use std::sync::{Arc, Mutex};

use gd_host::{Module, ModuleContext, ModuleFactory, ModuleInstance, ModuleList, ModuleRegistry, Thread};

mod common;

/// Lifecycle events of the chain below, in order. Only one test drives the chain.
static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn record(event: String) {
    EVENTS.lock().unwrap().push(event);
}

struct Chain {
    name: &'static str,
    depends_on: Option<&'static ModuleFactory>,
}

impl Module for Chain {
    fn list_dependencies(&self, list: &mut ModuleList) {
        if let Some(dependency) = self.depends_on {
            list.add(dependency);
        }
    }

    fn start(&self, ctx: &ModuleContext) {
        assert!(!ctx.handler().is_cleared());
        record(format!("start {}", self.name));
    }

    fn stop(&self, _ctx: &ModuleContext) {
        record(format!("stop {}", self.name));
    }

    fn name(&self) -> String {
        self.name.into()
    }
}

static STORAGE: ModuleFactory = ModuleFactory::new(|| {
    ModuleInstance::new(Chain {
        name: "storage",
        depends_on: None,
    })
});
static CONTROLLER: ModuleFactory = ModuleFactory::new(|| {
    ModuleInstance::new(Chain {
        name: "controller",
        depends_on: Some(&STORAGE),
    })
});
static SECURITY: ModuleFactory = ModuleFactory::new(|| {
    ModuleInstance::new(Chain {
        name: "security",
        depends_on: Some(&CONTROLLER),
    })
});

#[test]
fn start_is_idempotent_and_teardown_reverses_start_order() {
    common::init_logger();
    let registry = ModuleRegistry::new();
    let thread = Thread::new("chain");

    let first: Arc<Chain> = registry.start(&SECURITY, &thread);
    let second: Arc<Chain> = registry.start(&SECURITY, &thread);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 3);

    let mut list = ModuleList::new();
    list.add(&STORAGE).add(&CONTROLLER);
    registry.start_all(&list, &thread);
    assert_eq!(registry.len(), 3);

    registry.stop_all();
    assert!(registry.is_empty());

    let events = EVENTS.lock().unwrap().clone();
    assert_eq!(
        events,
        [
            "start storage",
            "start controller",
            "start security",
            "stop security",
            "stop controller",
            "stop storage",
        ]
    );
}

struct Sneaky;

impl Module for Sneaky {
    fn start(&self, ctx: &ModuleContext) {
        let _: Arc<Chain> = ctx.get_dependency(&STORAGE);
    }

    fn stop(&self, _ctx: &ModuleContext) {}

    fn name(&self) -> String {
        "Sneaky".into()
    }
}

static SNEAKY: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Sneaky));

#[test]
#[should_panic(expected = "was not listed as a dependency")]
fn undeclared_dependency_panics() {
    let registry = ModuleRegistry::new();
    let thread = Thread::new("sneaky");
    registry.start::<Sneaky>(&SNEAKY, &thread);
}

struct Cyclic(&'static ModuleFactory);

impl Module for Cyclic {
    fn list_dependencies(&self, list: &mut ModuleList) {
        list.add(self.0);
    }

    fn start(&self, _ctx: &ModuleContext) {}

    fn stop(&self, _ctx: &ModuleContext) {}

    fn name(&self) -> String {
        "Cyclic".into()
    }
}

static PING: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Cyclic(&PONG)));
static PONG: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Cyclic(&PING)));

#[test]
#[should_panic(expected = "dependency cycle")]
fn dependency_cycle_panics() {
    let registry = ModuleRegistry::new();
    let thread = Thread::new("cycle");
    registry.start::<Cyclic>(&PING, &thread);
}

struct Slow;

static SLOW_STARTS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

impl Module for Slow {
    fn start(&self, _ctx: &ModuleContext) {
        SLOW_STARTS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(300));
    }

    fn stop(&self, _ctx: &ModuleContext) {}

    fn name(&self) -> String {
        "Slow".into()
    }
}

static SLOW: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Slow));

#[test]
fn concurrent_start_waits_for_the_first() {
    common::init_logger();
    let registry = Arc::new(ModuleRegistry::new());
    let thread = Arc::new(Thread::new("slow"));

    let first = {
        let registry = registry.clone();
        let thread = thread.clone();
        std::thread::spawn(move || registry.start::<Slow>(&SLOW, &thread))
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    let second = {
        let registry = registry.clone();
        let thread = thread.clone();
        std::thread::spawn(move || registry.start::<Slow>(&SLOW, &thread))
    };

    let first = first.join().expect("first start panicked");
    let second = second.join().expect("second start panicked");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(SLOW_STARTS.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);
    registry.stop_all();
}
