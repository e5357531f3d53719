//! Request-scoped context shared by every event emitted while a request is
//! being handled.
//!
//! A scope belongs to one unit of execution. Inside [`ContextStore::scope`]
//! that unit is the current Tokio task. Outside any Tokio runtime it is the
//! current OS thread. Tokio tasks without a task scope have no slot at all:
//! tasks interleave on worker threads, so a thread slot would be shared
//! between unrelated requests. Units never observe each other's context.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::future::Future;
use uuid::Uuid;

use crate::error::ContextError;

/// Key under which the request id is stored in the context.
pub const REQUEST_ID_KEY: &str = "request_id";

type ScopeSlot = RefCell<Option<Map<String, Value>>>;

tokio::task_local! {
    static TASK_SCOPE: ScopeSlot;
}

thread_local! {
    static THREAD_SCOPE: ScopeSlot = const { RefCell::new(None) };
}

/// Run `f` against the caller's slot, or return `None` when the caller is a
/// Tokio task that was not started inside [`ContextStore::scope`].
fn with_slot<R>(f: impl FnOnce(&ScopeSlot) -> R) -> Option<R> {
    if TASK_SCOPE.try_with(|_| ()).is_ok() {
        Some(TASK_SCOPE.with(f))
    } else if tokio::runtime::Handle::try_current().is_ok() {
        None
    } else {
        Some(THREAD_SCOPE.with(f))
    }
}

/// Handle to the per-unit context slot.
///
/// The handle itself is stateless; all state lives in the task- or
/// thread-local slot of whoever calls it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStore;

impl ContextStore {
    pub fn new() -> Self {
        Self
    }

    /// Run `fut` with its own task-local context slot.
    ///
    /// Async request handlers must run inside this so that context follows
    /// the task across worker threads.
    pub async fn scope<F>(fut: F) -> F::Output
    where
        F: Future,
    {
        TASK_SCOPE.scope(RefCell::new(None), fut).await
    }

    /// Open a context scope for `request_id` seeded with `metadata`.
    ///
    /// A second `begin` without an intervening [`end`](Self::end) is a caller
    /// bug and is rejected; the active scope is left untouched. Inside a Tokio
    /// runtime the calling task must run under [`scope`](Self::scope),
    /// otherwise [`ContextError::NoTaskScope`] is returned.
    pub fn begin(&self, request_id: &str, metadata: Map<String, Value>) -> Result<(), ContextError> {
        with_slot(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(active) = slot.as_ref() {
                let active_request_id = active
                    .get(REQUEST_ID_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Err(ContextError::ScopeActive { active_request_id });
            }
            let mut fields = metadata;
            fields.insert(REQUEST_ID_KEY.to_string(), Value::String(request_id.to_string()));
            *slot = Some(fields);
            Ok(())
        })
        .unwrap_or(Err(ContextError::NoTaskScope))
    }

    /// Add or overwrite fields in the active scope.
    ///
    /// The request id is immutable and is never overwritten. Returns
    /// `false` when no scope is active.
    pub fn merge(&self, fields: Map<String, Value>) -> bool {
        with_slot(|slot| match slot.borrow_mut().as_mut() {
            Some(active) => {
                for (key, value) in fields {
                    if key != REQUEST_ID_KEY {
                        active.insert(key, value);
                    }
                }
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// Owned copy of the active context, or an empty map.
    pub fn snapshot(&self) -> Map<String, Value> {
        with_slot(|slot| slot.borrow().clone())
            .flatten()
            .unwrap_or_default()
    }

    /// Close the active scope. No-op when none is active.
    pub fn end(&self) {
        with_slot(|slot| {
            slot.borrow_mut().take();
        });
    }

    pub fn is_active(&self) -> bool {
        with_slot(|slot| slot.borrow().is_some()).unwrap_or(false)
    }

    pub fn current_request_id(&self) -> Option<String> {
        with_slot(|slot| {
            slot.borrow()
                .as_ref()
                .and_then(|ctx| ctx.get(REQUEST_ID_KEY))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .flatten()
    }
}

/// Authenticated user behind a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Numeric or string id, whatever the host's user store uses.
    pub user_id: Option<Value>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub method: String,
    pub url: String,
    pub route: Option<String>,
    pub path: String,
    pub query: Map<String, Value>,
    /// Whether the request carries an uploaded file.
    #[serde(default)]
    pub has_file: bool,
}

/// Typed request metadata extracted by the host from its own request type.
///
/// Well-known fields are closed; anything else goes into `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub identity: Option<Identity>,
    pub network: NetworkInfo,
    pub routing: RoutingInfo,
    pub session_id: Option<String>,
    pub extensions: Map<String, Value>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }

    /// Context with a fresh random (v4 UUID) request id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Flatten into the fields shared with every event of the request.
    ///
    /// `path` and `query` are not shared; they belong to the incoming
    /// request event only. Well-known keys take precedence over
    /// `extensions` entries with the same name.
    pub fn shared_fields(&self) -> Map<String, Value> {
        let mut fields = self.extensions.clone();
        fields.insert(REQUEST_ID_KEY.to_string(), Value::String(self.request_id.clone()));

        if let Some(identity) = &self.identity {
            if let Some(user_id) = &identity.user_id {
                fields.insert("user_id".to_string(), user_id.clone());
            }
            insert_opt(&mut fields, "user_email", identity.email.as_deref());
        }
        insert_opt(&mut fields, "ip_address", self.network.ip_address.as_deref());
        insert_opt(&mut fields, "user_agent", self.network.user_agent.as_deref());
        insert_opt(&mut fields, "session_id", self.session_id.as_deref());
        insert_opt(&mut fields, "method", non_empty(&self.routing.method));
        insert_opt(&mut fields, "url", non_empty(&self.routing.url));
        insert_opt(&mut fields, "route", self.routing.route.as_deref());
        fields
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn insert_opt(fields: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), Value::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn begin_merge_snapshot_end() {
        let store = ContextStore::new();
        store.begin("r1", map(json!({"method": "GET"}))).unwrap();
        assert!(store.merge(map(json!({"method": "POST", "user_id": 7}))));

        let snap = store.snapshot();
        assert_eq!(snap["request_id"], "r1");
        assert_eq!(snap["method"], "POST");
        assert_eq!(snap["user_id"], 7);

        store.end();
        assert!(store.snapshot().is_empty());
        assert!(!store.merge(map(json!({"late": true}))));
    }

    #[test]
    fn nested_begin_is_rejected_and_keeps_active_scope() {
        let store = ContextStore::new();
        store.begin("outer", Map::new()).unwrap();
        let err = store.begin("inner", Map::new()).unwrap_err();
        assert!(matches!(err, ContextError::ScopeActive { ref active_request_id } if active_request_id == "outer"));
        assert_eq!(store.current_request_id().as_deref(), Some("outer"));
        store.end();
    }

    #[test]
    fn end_is_idempotent() {
        let store = ContextStore::new();
        store.end();
        store.begin("r1", Map::new()).unwrap();
        store.end();
        store.end();
        assert!(!store.is_active());
    }

    #[test]
    fn snapshot_is_detached_from_later_merges() {
        let store = ContextStore::new();
        store.begin("r1", Map::new()).unwrap();
        let before = store.snapshot();
        store.merge(map(json!({"step": 2})));
        assert!(before.get("step").is_none());
        store.end();
    }

    #[test]
    fn request_id_cannot_be_overwritten_by_merge() {
        let store = ContextStore::new();
        store.begin("r1", Map::new()).unwrap();
        store.merge(map(json!({"request_id": "spoofed"})));
        assert_eq!(store.current_request_id().as_deref(), Some("r1"));
        store.end();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_task_scopes_are_isolated() {
        let barrier = Arc::new(Barrier::new(2));

        let spawn_request = |id: &'static str, barrier: Arc<Barrier>| {
            tokio::spawn(ContextStore::scope(async move {
                let store = ContextStore::new();
                store.begin(id, Map::new()).unwrap();
                store.merge(map(json!({ "owner": id })));
                barrier.wait().await;
                let snap = store.snapshot();
                store.end();
                snap
            }))
        };

        let a = spawn_request("a", Arc::clone(&barrier));
        let b = spawn_request("b", Arc::clone(&barrier));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a["owner"], "a");
        assert_eq!(a["request_id"], "a");
        assert_eq!(b["owner"], "b");
        assert_eq!(b["request_id"], "b");
    }

    #[tokio::test]
    async fn unscoped_tasks_are_refused_instead_of_sharing_a_thread_slot() {
        let store = ContextStore::new();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let a = tokio::spawn(async move {
            let result = store.begin("A", Map::new());
            let _ = started_tx.send(());
            tokio::task::yield_now().await;
            result
        });
        let b = tokio::spawn(async move {
            let _ = started_rx.await;
            let result = store.begin("B", Map::new());
            (result, store.snapshot(), store.current_request_id())
        });

        assert_eq!(a.await.unwrap(), Err(ContextError::NoTaskScope));
        let (result, snapshot, request_id) = b.await.unwrap();
        assert_eq!(result, Err(ContextError::NoTaskScope));
        assert!(snapshot.is_empty());
        assert_eq!(request_id, None);
        assert!(!store.merge(map(json!({"late": true}))));
        assert!(!store.is_active());
    }

    #[tokio::test]
    async fn scoped_task_ignores_the_thread_slot() {
        ContextStore::scope(async {
            let store = ContextStore::new();
            store.begin("scoped", Map::new()).unwrap();
            assert_eq!(store.current_request_id().as_deref(), Some("scoped"));
            store.end();
        })
        .await;
        assert!(THREAD_SCOPE.with(|slot| slot.borrow().is_none()));
    }

    #[test]
    fn threads_have_separate_scopes() {
        let store = ContextStore::new();
        store.begin("main", Map::new()).unwrap();
        let other = std::thread::spawn(|| ContextStore::new().snapshot()).join().unwrap();
        assert!(other.is_empty());
        store.end();
    }

    #[test]
    fn shared_fields_flatten_well_known_keys() {
        let mut ctx = RequestContext::new("r1");
        ctx.identity = Some(Identity {
            user_id: Some(json!(42)),
            email: Some("a@example.com".into()),
        });
        ctx.routing.method = "GET".into();
        ctx.routing.route = Some("todos.index".into());
        ctx.extensions.insert("method".into(), json!("SPOOF"));
        ctx.extensions.insert("tenant".into(), json!("acme"));

        let fields = ctx.shared_fields();
        assert_eq!(fields["request_id"], "r1");
        assert_eq!(fields["user_id"], 42);
        assert_eq!(fields["user_email"], "a@example.com");
        assert_eq!(fields["method"], "GET");
        assert_eq!(fields["route"], "todos.index");
        assert_eq!(fields["tenant"], "acme");
        assert!(fields.get("url").is_none());
        assert!(fields.get("ip_address").is_none());
    }
}
