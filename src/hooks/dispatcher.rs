use super::event::{EventKind, LifecycleEvent};
use super::metrics::HookMetrics;
use crate::core::{DataError, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{Level, event};

pub type SyncHookFn = Arc<dyn Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync>;
pub type AsyncHookFn = Arc<dyn Fn(LifecycleEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type HookFilter = Arc<dyn Fn(&LifecycleEvent) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum HookHandler {
    Sync(SyncHookFn),
    Async(AsyncHookFn),
}

impl HookHandler {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move |event| Box::pin(f(event))))
    }

    fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for HookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("HookHandler::Sync"),
            Self::Async(_) => f.write_str("HookHandler::Async"),
        }
    }
}

/// Registration options
#[derive(Clone, Default)]
pub struct HookOptions {
    /// Higher runs first; equal priorities keep registration order
    pub priority: i32,

    /// Run on a spawned task, subject to `timeout`
    pub is_async: bool,

    /// Advisory: exceeding it is logged and counted, the handler keeps running
    pub timeout: Option<Duration>,

    pub filter: Option<HookFilter>,

    /// Label used in diagnostics
    pub name: Option<String>,

    /// Only fire for events about this component
    pub component: Option<String>,
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&LifecycleEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }
}

impl fmt::Debug for HookOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookOptions")
            .field("priority", &self.priority)
            .field("is_async", &self.is_async)
            .field("timeout", &self.timeout)
            .field("filter", &self.filter.is_some())
            .field("name", &self.name)
            .field("component", &self.component)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Registration {
    id: HookId,
    kind: EventKind,
    handler: HookHandler,
    options: HookOptions,
}

impl Registration {
    fn label(&self) -> String {
        self.options.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    fn runs_on_task(&self) -> bool {
        self.options.is_async || self.handler.is_async()
    }

    fn accepts(&self, event: &LifecycleEvent) -> bool {
        if let Some(component) = &self.options.component
            && event.component() != Some(component.as_str())
        {
            return false;
        }
        match &self.options.filter {
            Some(filter) => catch_unwind(AssertUnwindSafe(|| filter(event))).unwrap_or(false),
            None => true,
        }
    }
}

/// Outcome of firing one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookReport {
    /// Handlers selected for the event
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Still running when their timeout elapsed
    pub timed_out: usize,
    /// Handed to a task without waiting (`fire_detached`)
    pub detached: usize,
}

type MetricsMap = Arc<Mutex<HashMap<EventKind, HookMetrics>>>;

fn record(metrics: &MetricsMap, kind: EventKind, elapsed: Duration, failed: bool) {
    match metrics.lock() {
        Ok(mut map) => map.entry(kind).or_default().record(elapsed, failed),
        Err(e) => event!(Level::ERROR, error = %e, "Hook metrics lock poisoned"),
    }
}

fn record_timeout(metrics: &MetricsMap, kind: EventKind) {
    if let Ok(mut map) = metrics.lock() {
        map.entry(kind).or_default().timeouts += 1;
    }
}

fn log_failure(label: &str, kind: EventKind, error: &str) {
    event!(Level::ERROR, hook = label, kind = kind.as_str(), error, "Hook failed");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

/// Run a handler body on a task and report whether it failed.
fn spawn_handler(handler: HookHandler, event: LifecycleEvent) -> JoinHandle<anyhow::Result<()>> {
    match handler {
        HookHandler::Async(f) => tokio::spawn(f(event)),
        HookHandler::Sync(f) => tokio::spawn(async move { f(&event) }),
    }
}

/// Priority-ordered lifecycle event bus.
///
/// Handler failures (errors and panics) are logged and counted; they never
/// reach the code that fired the event and never stop later handlers.
pub struct HookDispatcher {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    metrics: MetricsMap,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register(&self, kind: EventKind, handler: HookHandler, options: HookOptions) -> Result<HookId> {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration {
            id,
            kind,
            handler,
            options,
        };
        event!(
            Level::DEBUG,
            hook = %registration.label(),
            kind = kind.as_str(),
            priority = registration.options.priority,
            "Hook registered"
        );
        self.registrations.write()?.push(registration);
        Ok(id)
    }

    pub fn register_entity_hook(&self, kind: EventKind, handler: HookHandler, options: HookOptions) -> Result<HookId> {
        if !kind.is_entity_event() {
            return Err(DataError::InvalidArgument(format!("'{}' is not an entity event", kind)));
        }
        self.register(kind, handler, options)
    }

    pub fn register_component_hook(
        &self,
        kind: EventKind,
        handler: HookHandler,
        options: HookOptions,
    ) -> Result<HookId> {
        if !kind.is_component_event() {
            return Err(DataError::InvalidArgument(format!("'{}' is not a component event", kind)));
        }
        self.register(kind, handler, options)
    }

    /// Returns whether a hook with this id existed.
    pub fn remove_hook(&self, id: HookId) -> Result<bool> {
        let mut registrations = self.registrations.write()?;
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        Ok(registrations.len() != before)
    }

    pub fn clear_all_hooks(&self) -> Result<()> {
        self.registrations.write()?.clear();
        Ok(())
    }

    pub fn get_hook_count(&self, kind: Option<EventKind>) -> Result<usize> {
        let registrations = self.registrations.read()?;
        Ok(match kind {
            Some(kind) => registrations.iter().filter(|r| r.kind == kind).count(),
            None => registrations.len(),
        })
    }

    /// Handlers for `event` in execution order.
    fn select(&self, event: &LifecycleEvent) -> Result<Vec<Registration>> {
        let kind = event.kind();
        let mut selected: Vec<Registration> = self
            .registrations
            .read()?
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        selected.retain(|r| r.accepts(event));
        // Stable: equal priorities keep registration order
        selected.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));
        Ok(selected)
    }

    fn run_inline(&self, registration: &Registration, event: &LifecycleEvent) -> bool {
        let HookHandler::Sync(f) = &registration.handler else {
            return false;
        };
        let started = Instant::now();
        let outcome = match catch_unwind(AssertUnwindSafe(|| f(event))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(panic_message(payload.as_ref())),
        };
        let failed = outcome.is_err();
        if let Err(error) = outcome {
            log_failure(&registration.label(), registration.kind, &error);
        }
        record(&self.metrics, registration.kind, started.elapsed(), failed);
        !failed
    }

    /// Watch a spawned handler to completion, for metrics only.
    fn observe(&self, registration: &Registration, handle: JoinHandle<anyhow::Result<()>>, started: Instant) {
        let metrics = Arc::clone(&self.metrics);
        let label = registration.label();
        let kind = registration.kind;
        tokio::spawn(async move {
            let failed = Self::settle(&label, kind, handle.await);
            record(&metrics, kind, started.elapsed(), failed);
        });
    }

    fn settle(
        label: &str,
        kind: EventKind,
        joined: std::result::Result<anyhow::Result<()>, tokio::task::JoinError>,
    ) -> bool {
        match joined {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                log_failure(label, kind, &e.to_string());
                true
            }
            Err(e) => {
                log_failure(label, kind, &e.to_string());
                true
            }
        }
    }

    /// Fire an event and wait for its handlers.
    ///
    /// Async handlers are awaited up to their timeout; a handler still
    /// running after it is left running and observed in the background.
    pub async fn fire(&self, event: &LifecycleEvent) -> HookReport {
        let selected = match self.select(event) {
            Ok(selected) => selected,
            Err(e) => {
                event!(Level::ERROR, error = %e, "Hook registry unavailable");
                return HookReport::default();
            }
        };

        let mut report = HookReport {
            matched: selected.len(),
            ..HookReport::default()
        };

        for registration in &selected {
            if !registration.runs_on_task() {
                if self.run_inline(registration, event) {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            let started = Instant::now();
            let mut handle = spawn_handler(registration.handler.clone(), event.clone());
            let joined = match registration.options.timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        event!(
                            Level::WARN,
                            hook = %registration.label(),
                            kind = registration.kind.as_str(),
                            timeout_ms = limit.as_millis() as u64,
                            "Hook exceeded its timeout; still running"
                        );
                        record_timeout(&self.metrics, registration.kind);
                        self.observe(registration, handle, started);
                        report.timed_out += 1;
                        continue;
                    }
                },
                None => handle.await,
            };

            let failed = Self::settle(&registration.label(), registration.kind, joined);
            record(&self.metrics, registration.kind, started.elapsed(), failed);
            if failed {
                report.failed += 1;
            } else {
                report.succeeded += 1;
            }
        }

        report
    }

    /// Fire without waiting: sync handlers run inline, task handlers are
    /// spawned on the current Tokio runtime.
    pub fn fire_detached(&self, event: &LifecycleEvent) -> HookReport {
        let selected = match self.select(event) {
            Ok(selected) => selected,
            Err(e) => {
                event!(Level::ERROR, error = %e, "Hook registry unavailable");
                return HookReport::default();
            }
        };

        let mut report = HookReport {
            matched: selected.len(),
            ..HookReport::default()
        };
        let runtime = Handle::try_current().ok();

        for registration in &selected {
            if !registration.runs_on_task() {
                if self.run_inline(registration, event) {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            let Some(runtime) = &runtime else {
                log_failure(&registration.label(), registration.kind, "no Tokio runtime to run async hook");
                record(&self.metrics, registration.kind, Duration::ZERO, true);
                report.failed += 1;
                continue;
            };

            let _guard = runtime.enter();
            let started = Instant::now();
            let handle = spawn_handler(registration.handler.clone(), event.clone());
            self.observe(registration, handle, started);
            report.detached += 1;
        }

        report
    }

    /// Fire events in order, each with full [`fire`](Self::fire) semantics.
    pub async fn execute_hooks_batch(&self, events: &[LifecycleEvent]) -> Vec<HookReport> {
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            reports.push(self.fire(event).await);
        }
        reports
    }

    pub fn get_metrics(&self, kind: EventKind) -> HookMetrics {
        self.metrics
            .lock()
            .map(|map| map.get(&kind).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn all_metrics(&self) -> HashMap<EventKind, HookMetrics> {
        self.metrics.lock().map(|map| map.clone()).unwrap_or_default()
    }

    pub fn reset_metrics(&self, kind: Option<EventKind>) -> Result<()> {
        let mut map = self.metrics.lock()?;
        match kind {
            Some(kind) => {
                map.remove(&kind);
            }
            None => map.clear(),
        }
        Ok(())
    }
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("hooks", &self.get_hook_count(None).unwrap_or_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Document, EntityId, TypeId};
    use std::sync::atomic::AtomicUsize;

    fn created() -> LifecycleEvent {
        LifecycleEvent::EntityCreated {
            entity_id: EntityId::new(),
            components: vec!["User".into()],
        }
    }

    fn added(component: &str) -> LifecycleEvent {
        LifecycleEvent::ComponentAdded {
            entity_id: EntityId::new(),
            component: component.into(),
            type_id: TypeId::for_name(component),
            data: Document::new(),
        }
    }

    fn recorder(order: &Arc<Mutex<Vec<i32>>>, tag: i32) -> HookHandler {
        let order = Arc::clone(order);
        HookHandler::sync(move |_| {
            order.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_priority_order() {
        let hooks = HookDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for priority in [1, 2, 0] {
            hooks
                .register_entity_hook(
                    EventKind::EntityCreated,
                    recorder(&order, priority),
                    HookOptions::new().priority(priority),
                )
                .unwrap();
        }

        let report = hooks.fire(&created()).await;
        assert_eq!(report.succeeded, 3);
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn test_equal_priority_keeps_registration_order() {
        let hooks = HookDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [10, 20, 30] {
            hooks
                .register_entity_hook(EventKind::EntityCreated, recorder(&order, tag), HookOptions::new())
                .unwrap();
        }
        hooks.fire(&created()).await;
        assert_eq!(*order.lock().unwrap(), vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_hooks_do_not_stop_others() {
        let hooks = HookDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));

        hooks
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::sync(|_| Err(anyhow::anyhow!("boom"))),
                HookOptions::new().priority(3),
            )
            .unwrap();
        hooks
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::sync(|_| panic!("kaboom")),
                HookOptions::new().priority(2),
            )
            .unwrap();
        let counter = Arc::clone(&ran);
        hooks
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::sync(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                HookOptions::new().priority(1),
            )
            .unwrap();

        let report = hooks.fire(&created()).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let metrics = hooks.get_metrics(EventKind::EntityCreated);
        assert_eq!(metrics.executions, 3);
        assert_eq!(metrics.errors, 2);
    }

    #[tokio::test]
    async fn test_async_timeout_is_advisory() {
        let hooks = HookDispatcher::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);

        hooks
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::from_async(move |_| {
                    let flag = Arc::clone(&flag);
                    async move {
                        tokio::time::sleep(Duration::from_millis(60)).await;
                        flag.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                HookOptions::new().timeout(Duration::from_millis(10)),
            )
            .unwrap();

        let report = hooks.fire(&created()).await;
        assert_eq!(report.timed_out, 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        let metrics = hooks.get_metrics(EventKind::EntityCreated);
        assert_eq!(metrics.timeouts, 1);
        assert_eq!(metrics.executions, 1);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn test_filters_and_component_targets() {
        let hooks = HookDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        hooks
            .register_component_hook(
                EventKind::ComponentAdded,
                recorder(&order, 1),
                HookOptions::new().component("User"),
            )
            .unwrap();
        hooks
            .register_component_hook(
                EventKind::ComponentAdded,
                recorder(&order, 2),
                HookOptions::new().filter(|event| event.component() == Some("Post")),
            )
            .unwrap();

        hooks.fire(&added("User")).await;
        hooks.fire(&added("Post")).await;
        hooks.fire(&added("Other")).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_registration_management() {
        let hooks = HookDispatcher::new();
        let id = hooks
            .register_entity_hook(EventKind::EntityDeleted, HookHandler::sync(|_| Ok(())), HookOptions::new())
            .unwrap();
        hooks
            .register_component_hook(EventKind::ComponentRemoved, HookHandler::sync(|_| Ok(())), HookOptions::new())
            .unwrap();

        assert!(
            hooks
                .register_entity_hook(EventKind::ComponentAdded, HookHandler::sync(|_| Ok(())), HookOptions::new())
                .is_err()
        );
        assert_eq!(hooks.get_hook_count(None).unwrap(), 2);
        assert_eq!(hooks.get_hook_count(Some(EventKind::EntityDeleted)).unwrap(), 1);

        assert!(hooks.remove_hook(id).unwrap());
        assert!(!hooks.remove_hook(id).unwrap());
        hooks.clear_all_hooks().unwrap();
        assert_eq!(hooks.get_hook_count(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_and_reset_metrics() {
        let hooks = HookDispatcher::new();
        hooks
            .register_entity_hook(EventKind::EntityCreated, HookHandler::sync(|_| Ok(())), HookOptions::new())
            .unwrap();

        let reports = hooks.execute_hooks_batch(&[created(), created()]).await;
        assert_eq!(reports.len(), 2);
        assert_eq!(hooks.get_metrics(EventKind::EntityCreated).executions, 2);

        hooks.reset_metrics(Some(EventKind::EntityCreated)).unwrap();
        assert_eq!(hooks.get_metrics(EventKind::EntityCreated), HookMetrics::default());
    }

    #[tokio::test]
    async fn test_fire_detached_spawns_async_handlers() {
        let hooks = HookDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        hooks
            .register_entity_hook(
                EventKind::EntityCreated,
                HookHandler::from_async(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                HookOptions::new(),
            )
            .unwrap();

        let report = hooks.fire_detached(&created());
        assert_eq!(report.detached, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
