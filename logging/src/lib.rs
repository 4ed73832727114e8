//! Typed event logging.
//!
//! A [`Registry`] binds names to typed, buffering [`Logger`]s. Producers log
//! events cheaply into a shared buffer; the bound action sees batches of
//! `(elapsed, event)` pairs with non-decreasing timestamps, either when the
//! buffer fills or on an explicit flush. Dropping the registry entry is how
//! a stream is closed.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Number of buffered events before a logger flushes itself.
const BUFFER_CAPACITY: usize = 1024;

/// A map from names to typed loggers, sharing one start instant.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a registry whose loggers all measure from `time`.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds a name to an action on batches of events.
    ///
    /// Returns any previously installed entry rather than silently
    /// re-pointing loggers that were already handed out.
    pub fn insert<T: 'static>(
        &mut self,
        name: &str,
        action: Box<dyn Fn(&Duration, &[(Duration, T)])>,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.to_owned(), Box::new(logger))
    }

    /// Removes a binding, closing the stream for its consumers.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name)
    }

    /// Retrieves a shared logger for `name`, if one was inserted with the
    /// matching event type.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }
}

/// A buffering logger for events of type `T`.
pub struct Logger<T> {
    time: Instant,
    action: Rc<dyn Fn(&Duration, &[(Duration, T)])>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger {
            time: self.time,
            action: Rc::clone(&self.action),
            buffer: Rc::clone(&self.buffer),
        }
    }
}

impl<T> Logger<T> {
    /// Allocates a shareable logger bound to a write destination.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)])>) -> Self {
        Logger {
            time,
            action: action.into(),
            buffer: Rc::new(RefCell::new(Vec::with_capacity(BUFFER_CAPACITY))),
        }
    }

    /// Logs an event, stamped now but possibly delivered later due to
    /// buffering.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes buffered events and communicates the new minimal timestamp.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut registry = Registry::new(Instant::now());
        registry.insert::<u32>(
            "events",
            Box::new(move |_, batch| sink.borrow_mut().extend(batch.iter().map(|(_, e)| *e))),
        );

        let logger = registry.get::<u32>("events").expect("logger registered");
        logger.log(1);
        logger.log(2);
        assert!(seen.borrow().is_empty());
        logger.flush();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn typed_lookup_misses_on_wrong_type() {
        let mut registry = Registry::new(Instant::now());
        registry.insert::<u32>("events", Box::new(|_, _| {}));
        assert!(registry.get::<String>("events").is_none());
        assert!(registry.get::<u32>("absent").is_none());
    }
}
