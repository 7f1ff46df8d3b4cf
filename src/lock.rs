use std::sync::{Mutex, MutexGuard};

/// Lock `lock`, taking the inner value back if another thread panicked while
/// holding it. Session teardown must still run after such a panic.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(context, "mutex poisoned; recovering");
        crate::log_debug(&format!("Mutex poisoned in {context}; recovering"));
        poisoned.into_inner()
    })
}
