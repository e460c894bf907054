//! Execution-unit-local correlation storage
//!
//! Each execution unit owns exactly one context slot:
//!
//! - **Tokio tasks** run inside a task-local slot installed by
//!   [`CorrelationManager::scope`], [`CorrelationManager::spawn`] or
//!   [`CorrelationManager::with_context_async`].
//! - **Unscoped Tokio tasks** (plain `tokio::spawn`, a web framework's handler task)
//!   get a slot keyed by their [`tokio::task::Id`]. Nothing tells us when such a task
//!   ends, so the slot lives until [`CorrelationManager::clear_context`] runs or the
//!   table evicts it once it holds [`UNSCOPED_TASK_LIMIT`] entries.
//! - **Everything else** (plain threads, `block_on` futures) uses a thread-local slot.
//!
//! No slot is ever reachable from another unit. Work crosses a boundary only as an
//! explicit [`CorrelationSnapshot`] passed to [`CorrelationManager::inherit_context`].

use super::context::{CorrelationContext, CorrelationSnapshot};
use crate::config::CorrelationSettings;
use crate::error::CorrelationError;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::task::{Id as TaskId, JoinHandle};
use tracing::{debug, warn};

/// Unscoped tasks holding a context at once before the oldest is evicted
pub const UNSCOPED_TASK_LIMIT: usize = 10_000;

type Slot = RefCell<Option<Arc<CorrelationContext>>>;

tokio::task_local! {
    static TASK_CONTEXT: Slot;
}

thread_local! {
    static THREAD_CONTEXT: Slot = const { RefCell::new(None) };
}

// Task ids grow monotonically, so the first entry is the oldest task.
static UNSCOPED_TASKS: LazyLock<Mutex<BTreeMap<TaskId, Arc<CorrelationContext>>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

static UNSCOPED_WARNED: AtomicBool = AtomicBool::new(false);

/// Where the current execution unit keeps its context
enum Unit {
    Scoped,
    Unscoped(TaskId),
    Thread,
}

fn current_unit() -> Unit {
    if TASK_CONTEXT.try_with(|_| ()).is_ok() {
        Unit::Scoped
    } else if let Some(id) = tokio::task::try_id() {
        Unit::Unscoped(id)
    } else {
        Unit::Thread
    }
}

fn read_current() -> Option<Arc<CorrelationContext>> {
    match current_unit() {
        Unit::Scoped => TASK_CONTEXT.with(|slot| slot.borrow().clone()),
        Unit::Unscoped(id) => UNSCOPED_TASKS.lock().get(&id).cloned(),
        Unit::Thread => THREAD_CONTEXT.with(|slot| slot.borrow().clone()),
    }
}

fn replace_current(context: Option<Arc<CorrelationContext>>) -> Option<Arc<CorrelationContext>> {
    match current_unit() {
        Unit::Scoped => TASK_CONTEXT.with(|slot| slot.replace(context)),
        Unit::Unscoped(id) => replace_unscoped(id, context),
        Unit::Thread => THREAD_CONTEXT.with(|slot| slot.replace(context)),
    }
}

fn replace_unscoped(
    id: TaskId,
    context: Option<Arc<CorrelationContext>>,
) -> Option<Arc<CorrelationContext>> {
    let mut tasks = UNSCOPED_TASKS.lock();
    let Some(context) = context else {
        return tasks.remove(&id);
    };

    if !UNSCOPED_WARNED.swap(true, Ordering::Relaxed) {
        warn!(
            task_id = %id,
            "Correlation context set in a task not started through CorrelationManager::spawn or scope; \
             call clear_context when the task finishes"
        );
    }

    let previous = tasks.insert(id, context);
    while tasks.len() > UNSCOPED_TASK_LIMIT {
        if let Some((evicted, _)) = tasks.pop_first() {
            warn!(task_id = %evicted, "Evicted correlation context of an unscoped task");
        }
    }
    previous
}

/// Factory and propagation operations over [`CorrelationContext`]
#[derive(Debug, Clone)]
pub struct CorrelationManager {
    origin_component: String,
    synthesized_component: String,
}

impl Default for CorrelationManager {
    fn default() -> Self {
        Self::new("web")
    }
}

impl CorrelationManager {
    /// Create a manager whose root contexts start their chain at `origin_component`
    pub fn new(origin_component: impl Into<String>) -> Self {
        Self {
            origin_component: origin_component.into(),
            synthesized_component: "unknown".to_string(),
        }
    }

    pub fn from_settings(settings: &CorrelationSettings) -> Self {
        Self {
            origin_component: settings.origin_component.clone(),
            synthesized_component: settings.synthesized_component.clone(),
        }
    }

    pub fn origin_component(&self) -> &str {
        &self.origin_component
    }

    /// Start a new root context for an incoming request, replacing the current one
    pub fn start_request_context(
        &self,
        request_id: impl Into<String>,
        session_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Arc<CorrelationContext> {
        let mut context = CorrelationContext::root(self.origin_component.clone())
            .with_request_id(request_id)
            .with_metadata(metadata);
        if let Some(session_id) = session_id {
            context = context.with_session_id(session_id);
        }

        debug!(
            correlation_id = context.correlation_id(),
            request_id = context.request_id(),
            "Started request context"
        );
        self.install(context)
    }

    /// Start a new root context for a business flow (`flow_type:entity_id`)
    pub fn start_flow_context(
        &self,
        flow_type: &str,
        entity_id: impl Display,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Arc<CorrelationContext> {
        let context = CorrelationContext::root(self.origin_component.clone())
            .with_flow_id(format!("{}:{}", flow_type, entity_id))
            .with_metadata(metadata);

        debug!(
            correlation_id = context.correlation_id(),
            flow_id = context.flow_id(),
            "Started flow context"
        );
        self.install(context)
    }

    /// Derive a child of the current context and make it current
    pub fn create_child_context(
        &self,
        component: impl Into<String>,
        operation: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Arc<CorrelationContext>, CorrelationError> {
        let component = component.into();
        let parent = self
            .current_context()
            .ok_or_else(|| CorrelationError::NoActiveContext {
                component: component.clone(),
            })?;

        let child = parent.child(component, operation, metadata);
        debug!(
            correlation_id = child.correlation_id(),
            primary_correlation_id = child.primary_correlation_id(),
            depth = child.depth(),
            "Created child context"
        );
        Ok(self.install(child))
    }

    /// Plain snapshot of the current context, for handing work to another unit
    pub fn extract_correlation_data(&self) -> Option<CorrelationSnapshot> {
        self.current_context().map(|context| context.snapshot())
    }

    /// Rebuild a context from `snapshot` in this execution unit and make it current
    pub fn inherit_context(
        &self,
        snapshot: &CorrelationSnapshot,
        component: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Arc<CorrelationContext> {
        let context = CorrelationContext::from_snapshot(snapshot, component, metadata);
        debug!(
            correlation_id = context.correlation_id(),
            inherited_from = %snapshot.correlation_id,
            depth = context.depth(),
            "Inherited context"
        );
        self.install(context)
    }

    /// The active context for this execution unit, if any
    pub fn current_context(&self) -> Option<Arc<CorrelationContext>> {
        read_current()
    }

    /// The active context, or a freshly synthesized root when none is active.
    ///
    /// The synthesized context is not installed.
    pub fn current_or_synthesized(&self) -> Arc<CorrelationContext> {
        self.current_context().unwrap_or_else(|| {
            Arc::new(CorrelationContext::synthesized(
                self.synthesized_component.clone(),
            ))
        })
    }

    /// Install `context` while `body` runs, restoring the previous context on every
    /// exit path including unwinding.
    pub fn with_context<R>(&self, context: Arc<CorrelationContext>, body: impl FnOnce() -> R) -> R {
        let _guard = RestoreGuard {
            previous: Some(replace_current(Some(context))),
        };
        body()
    }

    /// Run `future` with `context` installed in a fresh task-local slot.
    ///
    /// The caller's context is untouched whether the future completes, fails or is
    /// dropped before completion.
    pub async fn with_context_async<F>(&self, context: Arc<CorrelationContext>, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_CONTEXT
            .scope(RefCell::new(Some(context)), future)
            .await
    }

    /// Run `future` as its own execution unit, starting with no context
    pub async fn scope<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_CONTEXT.scope(RefCell::new(None), future).await
    }

    /// Spawn `future` on the runtime as its own execution unit
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(TASK_CONTEXT.scope(RefCell::new(None), future))
    }

    /// Remove the active context from this execution unit
    pub fn clear_context(&self) {
        if let Some(previous) = replace_current(None) {
            debug!(correlation_id = previous.correlation_id(), "Cleared context");
        }
    }

    fn install(&self, context: CorrelationContext) -> Arc<CorrelationContext> {
        let context = Arc::new(context);
        replace_current(Some(context.clone()));
        context
    }
}

/// Puts the previous context back when dropped
struct RestoreGuard {
    previous: Option<Option<Arc<CorrelationContext>>>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            replace_current(previous);
        }
    }
}
