//! Cross-thread interrupts
//!
//! Each `ThreadContext` owns an `Arc<ThreadInterrupt>`. Other threads post a
//! request (raise an exception, exit) and the owning thread picks it up the
//! next time it polls.
//!
//! ## Poll Locations
//!
//! - Every method invocation and block call
//! - Every backward jump in the IR interpreter
//! - Every loop iteration in the node engine
//! - Explicit `thread_poll` instructions
//!
//! Requests are never delivered mid-instruction. The fast path is a single
//! atomic load.

use crate::runtime::Value;
use crate::signal::{Escape, RaiseException};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Request posted to another thread
#[derive(Debug, Clone)]
pub enum InterruptRequest {
    /// Raise this exception object at the next poll
    Raise(Value),
    /// Unwind the thread
    Exit,
}

/// Statistics for delivered interrupts
#[derive(Debug, Default)]
pub struct InterruptStats {
    /// Requests delivered to the owning thread
    delivered: AtomicUsize,
    /// Requests that replaced a pending one before delivery
    superseded: AtomicUsize,
}

impl InterruptStats {
    /// Requests acted on
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Requests replaced before delivery
    pub fn superseded(&self) -> usize {
        self.superseded.load(Ordering::Relaxed)
    }
}

/// Per-thread interrupt flag and mailbox
#[derive(Debug, Default)]
pub struct ThreadInterrupt {
    pending: AtomicBool,
    request: Mutex<Option<InterruptRequest>>,
    /// Delivery statistics
    pub stats: InterruptStats,
}

impl ThreadInterrupt {
    /// Empty mailbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owning thread to raise `exception`
    pub fn request_raise(&self, exception: Value) {
        self.post(InterruptRequest::Raise(exception));
    }

    /// Ask the owning thread to exit
    pub fn request_exit(&self) {
        self.post(InterruptRequest::Exit);
    }

    fn post(&self, request: InterruptRequest) {
        let mut slot = self.request.lock();
        if slot.replace(request).is_some() {
            self.stats.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.pending.store(true, Ordering::Release);
    }

    /// Whether a request is waiting
    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Fast inline check, called at every poll point
    #[inline(always)]
    pub fn poll(&self) -> Result<(), Escape> {
        if self.is_pending() {
            self.deliver()
        } else {
            Ok(())
        }
    }

    /// Slow path: take the pending request and turn it into an escape
    #[cold]
    #[inline(never)]
    fn deliver(&self) -> Result<(), Escape> {
        let request = {
            let mut slot = self.request.lock();
            self.pending.store(false, Ordering::Release);
            slot.take()
        };
        match request {
            Some(request) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                log::debug!("delivering interrupt {:?}", request);
                Err(match request {
                    InterruptRequest::Raise(exception) => {
                        Escape::Raise(RaiseException::new(exception))
                    }
                    InterruptRequest::Exit => Escape::ThreadExit,
                })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_without_request() {
        let interrupt = ThreadInterrupt::new();
        assert!(interrupt.poll().is_ok());
        assert_eq!(interrupt.stats.delivered(), 0);
    }

    #[test]
    fn test_exit_delivered_once() {
        let interrupt = ThreadInterrupt::new();
        interrupt.request_exit();
        assert!(interrupt.is_pending());
        assert!(matches!(interrupt.poll(), Err(Escape::ThreadExit)));
        assert!(!interrupt.is_pending());
        assert!(interrupt.poll().is_ok());
        assert_eq!(interrupt.stats.delivered(), 1);
    }

    #[test]
    fn test_later_request_supersedes() {
        let interrupt = ThreadInterrupt::new();
        interrupt.request_raise(Value::Fixnum(1));
        interrupt.request_exit();
        assert_eq!(interrupt.stats.superseded(), 1);
        assert!(matches!(interrupt.poll(), Err(Escape::ThreadExit)));
    }

    #[test]
    fn test_cross_thread_request() {
        let interrupt = std::sync::Arc::new(ThreadInterrupt::new());
        let remote = interrupt.clone();
        std::thread::spawn(move || remote.request_raise(Value::Fixnum(7)))
            .join()
            .unwrap();
        match interrupt.poll() {
            Err(Escape::Raise(exc)) => assert_eq!(exc.exception(), &Value::Fixnum(7)),
            other => panic!("expected raise, got {:?}", other),
        }
    }
}
