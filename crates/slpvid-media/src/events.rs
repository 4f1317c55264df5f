//! Listener lists for process and pipeline events.
//!
//! Listeners are invoked in registration order, outside of the internal lock,
//! so a listener may register further listeners or call back into its owner.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared callback invoked with an event value.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Many-shot event: every `emit` reaches every listener registered so far.
pub struct Listeners<T> {
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T: Clone> Listeners<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: Callback<T>) {
        lock(&self.callbacks).push(callback);
    }

    pub fn emit(&self, value: T) {
        let snapshot = lock(&self.callbacks).clone();
        for callback in snapshot {
            callback(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct OnceState<T> {
    value: Option<T>,
    callbacks: Vec<Callback<T>>,
}

/// One-shot event: fires at most once.
///
/// Listeners registered after the event fired are invoked immediately with
/// the stored value, so every listener sees the value exactly once.
pub struct OnceListeners<T> {
    state: Mutex<OnceState<T>>,
}

impl<T: Clone> OnceListeners<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnceState {
                value: None,
                callbacks: Vec::new(),
            }),
        }
    }

    pub fn add(&self, callback: Callback<T>) {
        let fired = {
            let mut state = lock(&self.state);
            match &state.value {
                Some(value) => Some(value.clone()),
                None => {
                    state.callbacks.push(callback.clone());
                    None
                }
            }
        };

        if let Some(value) = fired {
            callback(value);
        }
    }

    /// Fire the event. Returns `false` if it had already fired.
    pub fn fire(&self, value: T) -> bool {
        let callbacks = {
            let mut state = lock(&self.state);
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback(value.clone());
        }
        true
    }

    pub fn value(&self) -> Option<T> {
        lock(&self.state).value.clone()
    }

    pub fn has_fired(&self) -> bool {
        lock(&self.state).value.is_some()
    }
}

impl<T: Clone> Default for OnceListeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_listeners_called_in_order() {
        let listeners = Listeners::<i64>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            listeners.add(Arc::new(move |value: i64| {
                seen.lock().unwrap().push((id, value));
            }));
        }

        listeners.emit(7);
        listeners.emit(8);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, 7), (1, 7), (2, 7), (0, 8), (1, 8), (2, 8)]
        );
    }

    #[test]
    fn test_listener_may_register_during_emit() {
        let listeners = Arc::new(Listeners::<i32>::new());
        let inner = Arc::clone(&listeners);
        listeners.add(Arc::new(move |_: i32| {
            inner.add(Arc::new(|_: i32| {}));
        }));

        listeners.emit(1);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_once_fires_exactly_once() {
        let once = OnceListeners::<Option<i32>>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        once.add(Arc::new(move |_: Option<i32>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(once.fire(Some(0)));
        assert!(!once.fire(Some(1)));
        assert!(!once.fire(None));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(once.value(), Some(Some(0)));
    }

    #[test]
    fn test_once_late_listener_gets_stored_value() {
        let once = OnceListeners::<i32>::new();
        once.fire(42);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        once.add(Arc::new(move |value: i32| {
            *slot.lock().unwrap() = Some(value);
        }));

        assert_eq!(*seen.lock().unwrap(), Some(42));
        assert!(once.has_fired());
    }
}
