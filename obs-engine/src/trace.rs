//! # TraceContext
//!
//! Per-async-task key/value bag, addressed implicitly by the currently
//! running task rather than by an explicit handle threaded through every
//! call.
//!
//! Grounded on `context.go`'s goroutine-local store (`goroutineLocal`
//! keyed by `GoroutineID()`, with `SetContextValue`/`GetContextValue`/
//! `HasContext`/`ClearContext`/`GetContextJson`): a goroutine ID parsed
//! out of a stack trace has no Rust analogue, since Tokio tasks are not
//! addressable by a stable numeric ID the way goroutines are. `tokio::
//! task_local!` gives the same "ambient, per-task storage" property
//! directly, without stack parsing. Code that runs on a bare OS thread
//! rather than inside a Tokio task (the `obs-bench` harness driving a
//! benchmark on `std::thread::spawn`) has no task-local storage to attach
//! to; [`thread_scope`] gives the same bag shape via `thread_local!`.

use std::cell::RefCell;
use std::collections::HashMap;

use serde_json::Value as JsonValue;

tokio::task_local! {
    static CONTEXT: RefCell<HashMap<String, JsonValue>>;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<HashMap<String, JsonValue>>> = const { RefCell::new(None) };
}

fn in_task_scope() -> bool {
    CONTEXT.try_with(|_| ()).is_ok()
}

/// Runs `f` with a fresh, empty trace context scoped to the returned
/// future. Call this once per request at the point a new logical
/// operation begins (typically in [`crate::trace::RequestInterceptor`]'s
/// middleware-equivalent, wired up in `obs-server`).
pub async fn scope<F, Fut, T>(f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    CONTEXT.scope(RefCell::new(HashMap::new()), f()).await
}

/// Runs `f` with a fresh, empty trace context bag scoped to the current
/// OS thread, for code that never enters a Tokio task-local [`scope`] —
/// a plain `std::thread::spawn` worker. Nesting is not supported: the
/// bag is cleared when `f` returns, regardless of what was there before.
pub fn thread_scope<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    THREAD_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(HashMap::new()));
    let result = f();
    THREAD_CONTEXT.with(|ctx| *ctx.borrow_mut() = None);
    result
}

/// Stores `value` under `key` in the current trace context: the task-local
/// bag if inside a [`scope`], otherwise the current thread's
/// [`thread_scope`] bag if one is open.
///
/// Returns `false` if called outside both (mirrors `context.go`'s
/// `SetContextValue` returning an error in the equivalent case, but
/// without allocating an error type for what is a purely local
/// programming mistake).
pub fn set(key: impl Into<String>, value: impl Into<JsonValue>) -> bool {
    let key = key.into();
    let value = value.into();
    if in_task_scope() {
        CONTEXT.with(|ctx| ctx.borrow_mut().insert(key, value));
        return true;
    }
    THREAD_CONTEXT.with(|ctx| match ctx.borrow_mut().as_mut() {
        Some(map) => {
            map.insert(key, value);
            true
        }
        None => false,
    })
}

/// Reads `key` from the current trace context, if present.
pub fn get(key: &str) -> Option<JsonValue> {
    if in_task_scope() {
        return CONTEXT.with(|ctx| ctx.borrow().get(key).cloned());
    }
    THREAD_CONTEXT.with(|ctx| ctx.borrow().as_ref().and_then(|map| map.get(key).cloned()))
}

/// Returns true if a trace context exists for the current task or,
/// failing that, the current thread.
pub fn has_context() -> bool {
    in_task_scope() || THREAD_CONTEXT.with(|ctx| ctx.borrow().is_some())
}

/// Clears every key from the current trace context. A no-op outside both
/// a [`scope`] and a [`thread_scope`].
pub fn clear() {
    if in_task_scope() {
        CONTEXT.with(|ctx| ctx.borrow_mut().clear());
        return;
    }
    THREAD_CONTEXT.with(|ctx| {
        if let Some(map) = ctx.borrow_mut().as_mut() {
            map.clear();
        }
    });
}

/// Serializes the current trace context to a JSON object string, or
/// `"{}"` if there is no context or it is empty.
pub fn to_json() -> String {
    if in_task_scope() {
        return CONTEXT
            .with(|ctx| serde_json::to_string(&*ctx.borrow()).unwrap_or_else(|_| "{}".to_string()));
    }
    THREAD_CONTEXT.with(|ctx| match ctx.borrow().as_ref() {
        Some(map) => serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()),
        None => "{}".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outside_a_scope_there_is_no_context() {
        assert!(!has_context());
        assert!(!set("k", "v"));
        assert_eq!(get("k"), None);
        assert_eq!(to_json(), "{}");
    }

    #[tokio::test]
    async fn set_and_get_round_trip_inside_a_scope() {
        scope(|| async {
            assert!(has_context());
            assert!(set("request_id", "abc-123"));
            assert_eq!(get("request_id"), Some(JsonValue::String("abc-123".into())));
        })
        .await;
    }

    #[tokio::test]
    async fn clear_empties_the_context_without_ending_the_scope() {
        scope(|| async {
            set("a", 1);
            set("b", 2);
            clear();
            assert_eq!(get("a"), None);
            assert!(has_context());
        })
        .await;
    }

    #[tokio::test]
    async fn to_json_reflects_all_stored_keys() {
        scope(|| async {
            set("user", "alice");
            set("count", 7);
            let json: serde_json::Value = serde_json::from_str(&to_json()).unwrap();
            assert_eq!(json["user"], "alice");
            assert_eq!(json["count"], 7);
        })
        .await;
    }

    #[tokio::test]
    async fn distinct_scoped_tasks_do_not_share_state() {
        let t1 = tokio::spawn(scope(|| async {
            set("who", "first");
            get("who")
        }));
        let t2 = tokio::spawn(scope(|| async {
            set("who", "second");
            get("who")
        }));
        let (r1, r2) = tokio::join!(t1, t2);
        assert_eq!(r1.unwrap(), Some(JsonValue::String("first".into())));
        assert_eq!(r2.unwrap(), Some(JsonValue::String("second".into())));
    }

    #[test]
    fn bare_thread_falls_back_to_the_thread_local_bag() {
        std::thread::spawn(|| {
            assert!(!has_context());
            assert!(!set("k", "v"));

            thread_scope(|| {
                assert!(has_context());
                assert!(set("request_id", "xyz-789"));
                assert_eq!(get("request_id"), Some(JsonValue::String("xyz-789".into())));
            });

            assert!(!has_context());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn distinct_bare_threads_do_not_share_state() {
        let t1 = std::thread::spawn(|| {
            thread_scope(|| {
                set("who", "first");
                get("who")
            })
        });
        let t2 = std::thread::spawn(|| {
            thread_scope(|| {
                set("who", "second");
                get("who")
            })
        });
        assert_eq!(t1.join().unwrap(), Some(JsonValue::String("first".into())));
        assert_eq!(t2.join().unwrap(), Some(JsonValue::String("second".into())));
    }
}
