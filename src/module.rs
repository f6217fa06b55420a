//! Module lifecycle and dependency management.
//!
//! A [`Module`] is registered through a `static` [`ModuleFactory`]. The address of the
//! static identifies the module, so each factory yields at most one live instance per
//! [`ModuleRegistry`]. Starting a module first starts everything it lists in
//! [`Module::list_dependencies`], depth first, and every module gets its own
//! [`Handler`] on the thread it was started with.
//!
//! ```ignore
//! static FOO: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Foo::default()));
//!
//! let registry = ModuleRegistry::new();
//! let thread = Thread::new("stack");
//! let foo: Arc<Foo> = registry.start::<Foo>(&FOO, &thread);
//! registry.stop_all();
//! ```
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::ThreadId;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embassy_time::Duration;
use log::info;

use crate::config::MODULE_STOP_TIMEOUT_MS;
use crate::os::{Handler, Thread};

/// A unit of functionality with declared dependencies and a start/stop lifecycle.
///
/// All methods are called on the thread driving the registry. Work that touches module
/// state afterwards should be posted to [`ModuleContext::handler`].
pub trait Module: Send + Sync {
    /// Add the factories this module needs to `list`.
    fn list_dependencies(&self, _list: &mut ModuleList) {}

    fn start(&self, ctx: &ModuleContext);

    fn stop(&self, ctx: &ModuleContext);

    /// Name used in lifecycle logs.
    fn name(&self) -> String;

    /// Free form text describing the current state, for diagnostics.
    fn dump_state(&self) -> String {
        String::new()
    }
}

/// Constructor of a module. Use it as a `static`: its address is the module identity.
pub struct ModuleFactory {
    ctor: fn() -> ModuleInstance,
}

impl ModuleFactory {
    pub const fn new(ctor: fn() -> ModuleInstance) -> Self {
        Self { ctor }
    }

    fn key(&'static self) -> usize {
        self as *const ModuleFactory as usize
    }
}

impl core::fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ModuleFactory({:p})", self)
    }
}

/// A live module, type erased.
#[derive(Clone)]
pub struct ModuleInstance {
    module: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ModuleInstance {
    pub fn new<M: Module + 'static>(module: M) -> Self {
        Self::from_arc(Arc::new(module))
    }

    pub fn from_arc<M: Module + 'static>(module: Arc<M>) -> Self {
        Self {
            module: module.clone(),
            any: module,
        }
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Downcast to the concrete module type.
    pub fn downcast<M: Any + Send + Sync>(&self) -> Option<Arc<M>> {
        self.any.clone().downcast::<M>().ok()
    }
}

/// Ordered set of factories.
#[derive(Default, Clone, Debug)]
pub struct ModuleList {
    list: Vec<&'static ModuleFactory>,
}

impl ModuleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. Duplicates are ignored.
    pub fn add(&mut self, factory: &'static ModuleFactory) -> &mut Self {
        if !self.contains(factory) {
            self.list.push(factory);
        }
        self
    }

    pub fn contains(&self, factory: &'static ModuleFactory) -> bool {
        self.list.iter().any(|f| f.key() == factory.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static ModuleFactory> + '_ {
        self.list.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// What a module sees of the registry: its handler and its declared dependencies.
#[derive(Clone)]
pub struct ModuleContext {
    registry: Weak<Registry>,
    handler: Handler,
    dependencies: Arc<ModuleList>,
    name: String,
}

impl ModuleContext {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Returns the started instance of a declared dependency.
    ///
    /// # Panics
    ///
    /// If `factory` was not listed in [`Module::list_dependencies`], or the registry is gone.
    pub fn get_dependency<M: Any + Send + Sync>(&self, factory: &'static ModuleFactory) -> Arc<M> {
        if !self.dependencies.contains(factory) {
            panic!(
                "[module] {} requested {:?}, which was not listed as a dependency",
                self.name, factory
            );
        }
        let Some(registry) = self.registry.upgrade() else {
            panic!("[module] {} used after its registry was dropped", self.name);
        };
        registry.get(factory)
    }
}

struct Entry {
    instance: ModuleInstance,
    ctx: ModuleContext,
}

#[derive(Default)]
struct State {
    started: HashMap<usize, Entry>,
    start_order: Vec<&'static ModuleFactory>,
    starting: Vec<usize>,
    last_instance: String,
}

/// Thread currently inside [`Registry::start`], and how deep.
///
/// Starts are serialized across threads; nested starts of dependencies re-enter on the
/// owning thread.
#[derive(Default)]
struct StartLock {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl StartLock {
    fn acquire(&self) -> StartGuard<'_> {
        let me = std::thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let current = *owner;
            match current {
                Some((id, depth)) if id == me => {
                    *owner = Some((id, depth + 1));
                    break;
                }
                Some(_) => {
                    owner = self.released.wait(owner).unwrap_or_else(|e| e.into_inner());
                }
                None => {
                    *owner = Some((me, 1));
                    break;
                }
            }
        }
        StartGuard { lock: self }
    }
}

struct StartGuard<'a> {
    lock: &'a StartLock,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.lock.owner.lock().unwrap_or_else(|e| e.into_inner());
        let current = *owner;
        match current {
            Some((id, depth)) if depth > 1 => *owner = Some((id, depth - 1)),
            _ => {
                *owner = None;
                self.lock.released.notify_all();
            }
        }
    }
}

struct Registry {
    state: CriticalSectionMutex<RefCell<State>>,
    start_lock: StartLock,
    me: Weak<Registry>,
}

impl Registry {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    fn lookup(&self, factory: &'static ModuleFactory) -> Option<(ModuleInstance, ModuleContext)> {
        self.with(|state| {
            state
                .started
                .get(&factory.key())
                .map(|entry| (entry.instance.clone(), entry.ctx.clone()))
        })
    }

    fn get<M: Any + Send + Sync>(&self, factory: &'static ModuleFactory) -> Arc<M> {
        let Some((instance, ctx)) = self.lookup(factory) else {
            panic!("[module] request for {:?}, which is not started", factory);
        };
        match instance.downcast::<M>() {
            Some(module) => module,
            None => panic!(
                "[module] {} is not a {}",
                ctx.name,
                core::any::type_name::<M>()
            ),
        }
    }

    fn start(&self, factory: &'static ModuleFactory, thread: &Thread) -> ModuleInstance {
        if let Some((instance, _)) = self.lookup(factory) {
            return instance;
        }
        let _guard = self.start_lock.acquire();
        // Another thread may have finished it while we waited.
        if let Some((instance, _)) = self.lookup(factory) {
            return instance;
        }
        let cycle = self.with(|state| {
            if state.starting.contains(&factory.key()) {
                true
            } else {
                state.starting.push(factory.key());
                false
            }
        });
        if cycle {
            panic!("[module] dependency cycle through {:?}", factory);
        }

        info!("[module] constructing next module");
        let instance = (factory.ctor)();
        let name = instance.module.name();

        info!("[module] starting dependencies of {}", name);
        let mut dependencies = ModuleList::new();
        instance.module.list_dependencies(&mut dependencies);
        for dependency in dependencies.iter() {
            self.start(dependency, thread);
        }

        let ctx = ModuleContext {
            registry: self.me.clone(),
            handler: Handler::new(thread),
            dependencies: Arc::new(dependencies),
            name: name.clone(),
        };
        info!("[module] finished starting dependencies and calling start() of {}", name);
        self.with(|state| state.last_instance = format!("starting {}", name));
        instance.module.start(&ctx);

        self.with(|state| {
            state.starting.retain(|k| *k != factory.key());
            state.start_order.push(factory);
            state.started.insert(
                factory.key(),
                Entry {
                    instance: instance.clone(),
                    ctx,
                },
            );
        });
        info!("[module] started {}", name);
        instance
    }
}

/// Owns every started module and tears them down in reverse start order.
pub struct ModuleRegistry {
    inner: Arc<Registry>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new_cyclic(|me| Registry {
                state: CriticalSectionMutex::new(RefCell::new(State::default())),
                start_lock: StartLock::default(),
                me: me.clone(),
            }),
        }
    }

    /// Start the module built by `factory`, and its dependencies, on `thread`.
    ///
    /// Idempotent: a started module is returned as is.
    pub fn start<M: Any + Send + Sync>(&self, factory: &'static ModuleFactory, thread: &Thread) -> Arc<M> {
        let instance = self.inner.start(factory, thread);
        match instance.downcast::<M>() {
            Some(module) => module,
            None => panic!(
                "[module] {} is not a {}",
                instance.module.name(),
                core::any::type_name::<M>()
            ),
        }
    }

    /// Start every module of `list`, in order.
    pub fn start_all(&self, list: &ModuleList, thread: &Thread) {
        for factory in list.iter() {
            self.inner.start(factory, thread);
        }
    }

    /// Returns a started module.
    ///
    /// # Panics
    ///
    /// If the module is not started.
    pub fn get<M: Any + Send + Sync>(&self, factory: &'static ModuleFactory) -> Arc<M> {
        self.inner.get(factory)
    }

    pub fn is_started(&self, factory: &'static ModuleFactory) -> bool {
        self.inner.lookup(factory).is_some()
    }

    pub fn get_module_handler(&self, factory: &'static ModuleFactory) -> Option<Handler> {
        self.inner.lookup(factory).map(|(_, ctx)| ctx.handler)
    }

    /// Number of live modules.
    pub fn len(&self) -> usize {
        self.inner.with(|state| state.started.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last lifecycle step taken, useful when a start or stop hangs.
    pub fn last_instance(&self) -> String {
        self.inner.with(|state| state.last_instance.clone())
    }

    /// Install `instance` in place of whatever `factory` would build, and start it.
    ///
    /// Dependencies of the injected module are not started.
    pub fn inject_test_module(&self, factory: &'static ModuleFactory, instance: ModuleInstance, thread: &Thread) {
        let name = instance.module.name();
        let mut dependencies = ModuleList::new();
        instance.module.list_dependencies(&mut dependencies);
        let ctx = ModuleContext {
            registry: Arc::downgrade(&self.inner),
            handler: Handler::new(thread),
            dependencies: Arc::new(dependencies),
            name: name.clone(),
        };
        instance.module.start(&ctx);
        self.inner.with(|state| {
            state.start_order.push(factory);
            state.started.insert(factory.key(), Entry { instance, ctx });
        });
        info!("[module] injected {}", name);
    }

    /// Stop every module in reverse start order, then free them all.
    pub fn stop_all(&self) {
        let order: Vec<&'static ModuleFactory> = self.inner.with(|state| state.start_order.clone());
        let timeout = Duration::from_millis(MODULE_STOP_TIMEOUT_MS);

        for factory in order.iter().rev() {
            let Some((instance, ctx)) = self.inner.lookup(factory) else {
                panic!("[module] {:?} in start order but not started", factory);
            };
            let name = instance.module.name();
            self.inner.with(|state| state.last_instance = format!("stopping {}", name));

            info!("[module] stopping handler of {}", name);
            ctx.handler.clear();
            ctx.handler.wait_until_stopped(timeout);
            info!("[module] stopping {}", name);
            instance.module.stop(&ctx);
        }

        let freed = self.inner.with(|state| {
            state.start_order.clear();
            core::mem::take(&mut state.started)
        });
        // Module destructors may log or touch other modules; run them outside the lock.
        drop(freed);
    }

    /// Collect [`Module::dump_state`] of every started module, in start order.
    pub fn dump_state(&self) -> String {
        let modules: Vec<ModuleInstance> = self.inner.with(|state| {
            state
                .start_order
                .iter()
                .filter_map(|f| state.started.get(&f.key()).map(|e| e.instance.clone()))
                .collect()
        });
        let mut out = String::new();
        for instance in modules {
            let _ = writeln!(out, "{}: {}", instance.module.name(), instance.module.dump_state());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Leaf {
        running: Mutex<bool>,
    }

    impl Module for Leaf {
        fn start(&self, _ctx: &ModuleContext) {
            *self.running.lock().unwrap() = true;
        }
        fn stop(&self, _ctx: &ModuleContext) {
            *self.running.lock().unwrap() = false;
        }
        fn name(&self) -> String {
            "Leaf".into()
        }
        fn dump_state(&self) -> String {
            format!("running={}", self.running.lock().unwrap())
        }
    }

    static LEAF: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Leaf::default()));

    #[derive(Default)]
    struct Branch {
        leaf_running_at_start: Mutex<Option<bool>>,
    }

    impl Module for Branch {
        fn list_dependencies(&self, list: &mut ModuleList) {
            list.add(&LEAF);
        }
        fn start(&self, ctx: &ModuleContext) {
            let leaf: Arc<Leaf> = ctx.get_dependency(&LEAF);
            *self.leaf_running_at_start.lock().unwrap() = Some(*leaf.running.lock().unwrap());
        }
        fn stop(&self, ctx: &ModuleContext) {
            // Dependency is still reachable while stopping.
            let _leaf: Arc<Leaf> = ctx.get_dependency(&LEAF);
        }
        fn name(&self) -> String {
            "Branch".into()
        }
    }

    static BRANCH: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(Branch::default()));

    #[test]
    fn dependencies_start_first() {
        let registry = ModuleRegistry::new();
        let thread = Thread::new("module-test");
        let branch: Arc<Branch> = registry.start(&BRANCH, &thread);
        assert_eq!(*branch.leaf_running_at_start.lock().unwrap(), Some(true));
        assert!(registry.is_started(&LEAF));
        assert_eq!(registry.len(), 2);
        assert!(registry.get_module_handler(&BRANCH).is_some());
        assert!(registry.dump_state().contains("Leaf: running=true"));

        registry.stop_all();
        assert!(registry.is_empty());
        assert!(!registry.is_started(&BRANCH));
        assert!(registry.get_module_handler(&LEAF).is_none());
        assert_eq!(registry.last_instance(), "stopping Leaf");
    }

    #[test]
    #[should_panic]
    fn get_unstarted_module_panics() {
        let registry = ModuleRegistry::new();
        let _: Arc<Leaf> = registry.get(&LEAF);
    }

    #[test]
    fn injected_module_replaces_factory() {
        let registry = ModuleRegistry::new();
        let thread = Thread::new("inject-test");
        let fake = Arc::new(Leaf::default());
        registry.inject_test_module(&LEAF, ModuleInstance::from_arc(fake.clone()), &thread);
        let branch: Arc<Branch> = registry.start(&BRANCH, &thread);
        assert_eq!(*branch.leaf_running_at_start.lock().unwrap(), Some(true));
        assert!(Arc::ptr_eq(&registry.get::<Leaf>(&LEAF), &fake));
        registry.stop_all();
        assert!(!*fake.running.lock().unwrap());
    }
}
