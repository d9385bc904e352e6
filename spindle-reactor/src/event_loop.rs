use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, trace};

const EVENTS_CAPACITY: usize = 256;

/// What the OS reported for a registered source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

type ReadyCallback = Rc<RefCell<dyn FnMut(Readiness)>>;
type Task = Box<dyn FnOnce()>;

struct Shared {
    registry: Registry,
    callbacks: RefCell<HashMap<Token, ReadyCallback>>,
    tasks: RefCell<VecDeque<Task>>,
    next_token: Cell<usize>,
    stopped: Cell<bool>,
}

/// Single-threaded reactor.
///
/// Callbacks run to completion on the thread that called [`EventLoop::run`];
/// a callback that blocks stalls every other source. All mutation goes
/// through a [`LoopHandle`], which is safe to use from inside callbacks.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    shared: Rc<Shared>,
}

/// Cloneable handle to an [`EventLoop`] on the same thread.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Rc<Shared>,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            shared: Rc::new(Shared {
                registry,
                callbacks: RefCell::new(HashMap::new()),
                tasks: RefCell::new(VecDeque::new()),
                next_token: Cell::new(0),
                stopped: Cell::new(false),
            }),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Queues `task` and runs the loop.
    pub fn run_with(&mut self, task: impl FnOnce(&LoopHandle) + 'static) -> io::Result<()> {
        let handle = self.handle();
        self.handle().defer(move || task(&handle));
        self.run()
    }

    /// Dispatches readiness until [`LoopHandle::stop`] is called or nothing is
    /// left to wait for (no registered source and no deferred task).
    pub fn run(&mut self) -> io::Result<()> {
        self.shared.stopped.set(false);
        debug!("event loop running");

        loop {
            self.run_tasks();
            if self.shared.stopped.get() {
                break;
            }

            let has_tasks = !self.shared.tasks.borrow().is_empty();
            if self.shared.callbacks.borrow().is_empty() {
                if has_tasks {
                    continue;
                }
                break;
            }

            let timeout = has_tasks.then_some(Duration::ZERO);
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }

            let ready: Vec<(Token, Readiness)> = self
                .events
                .iter()
                .map(|event| (event.token(), Readiness::from(event)))
                .collect();
            for (token, readiness) in ready {
                if self.shared.stopped.get() {
                    break;
                }
                let callback = self.shared.callbacks.borrow().get(&token).cloned();
                let Some(callback) = callback else {
                    trace!(token = token.0, "readiness for deregistered source");
                    continue;
                };
                trace!(token = token.0, ?readiness, "dispatching");
                (&mut *callback.borrow_mut())(readiness);
            }
        }

        debug!("event loop stopped");
        Ok(())
    }

    // Tasks deferred while draining wait for the next turn.
    fn run_tasks(&self) {
        let pending = self.shared.tasks.borrow().len();
        for _ in 0..pending {
            let task = self.shared.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
            if self.shared.stopped.get() {
                break;
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let callbacks = std::mem::take(&mut *self.shared.callbacks.borrow_mut());
        let tasks = std::mem::take(&mut *self.shared.tasks.borrow_mut());
        drop(callbacks);
        drop(tasks);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("sources", &self.shared.callbacks.borrow().len())
            .finish()
    }
}

impl LoopHandle {
    /// Registers `source` and the callback invoked whenever it becomes ready.
    pub fn register<S, F>(
        &self,
        source: &mut S,
        interest: Interest,
        callback: F,
    ) -> io::Result<Token>
    where
        S: Source + ?Sized,
        F: FnMut(Readiness) + 'static,
    {
        let token = Token(self.shared.next_token.get());
        self.shared.next_token.set(token.0 + 1);
        self.shared.registry.register(source, token, interest)?;
        let callback: ReadyCallback = Rc::new(RefCell::new(callback));
        self.shared.callbacks.borrow_mut().insert(token, callback);
        trace!(token = token.0, ?interest, "source registered");
        Ok(token)
    }

    /// Changes the interest of an already registered source.
    pub fn reregister<S>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.shared.registry.reregister(source, token, interest)
    }

    /// Removes `source`. Deregistering an unknown token is a no-op.
    pub fn deregister<S>(&self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let removed = self.shared.callbacks.borrow_mut().remove(&token);
        if removed.is_none() {
            return Ok(());
        }
        trace!(token = token.0, "source deregistered");
        self.shared.registry.deregister(source)
    }

    /// Runs `task` on the next loop turn, before the loop polls again.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.shared.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn stop(&self) {
        self.shared.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.get()
    }

    pub fn source_count(&self) -> usize {
        self.shared.callbacks.borrow().len()
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("sources", &self.source_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
