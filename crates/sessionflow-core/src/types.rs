use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub type EpochMillis = i64;

/// Seconds since the Unix epoch
pub type EpochSeconds = i64;

/// Convert an epoch-milliseconds instant to the epoch-seconds TTL the store expects
#[inline]
pub fn ttl_from_millis(millis: EpochMillis) -> EpochSeconds {
    millis.div_euclid(1000)
}

/// Source of "now" for every time-dependent decision
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_millis(&self) -> EpochMillis;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> EpochMillis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and replay
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    /// Create a clock frozen at `now`
    pub fn new(now: EpochMillis) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Move the clock to an absolute instant
    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

/// A handle that is built on first use and shared afterwards.
///
/// The factory runs at most once per handle, even when several tasks race on
/// the first access. There is no way to reset or rebuild the value.
pub struct LazyHandle<T> {
    cell: OnceCell<Arc<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> LazyHandle<T> {
    /// Create a handle that will call `factory` on first access
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Get the shared value, constructing it if this is the first access
    pub fn get(&self) -> Arc<T> {
        self.cell
            .get_or_init(|| {
                tracing::debug!("Constructing lazily initialised handle");
                Arc::new((self.factory)())
            })
            .clone()
    }

    /// Whether the value has been constructed yet
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> fmt::Debug for LazyHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyHandle")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ttl_from_millis_floors() {
        assert_eq!(ttl_from_millis(1_700_000_000_999), 1_700_000_000);
        assert_eq!(ttl_from_millis(1_700_000_001_000), 1_700_000_001);
        assert_eq!(ttl_from_millis(0), 0);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_lazy_handle_constructs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = LazyHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            String::from("client")
        });

        assert!(!handle.is_initialized());
        let first = handle.get();
        let second = handle.get();
        assert!(handle.is_initialized());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
