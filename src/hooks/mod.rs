pub mod dispatcher;
pub mod event;
pub mod metrics;

pub use dispatcher::{AsyncHookFn, HookDispatcher, HookFilter, HookHandler, HookId, HookOptions, HookReport, SyncHookFn};
pub use event::{EventKind, LifecycleEvent};
pub use metrics::HookMetrics;
