//! Funnels events raised on native compiler threads onto one delivery context.
//!
//! Every event goes through a single unbounded channel with exactly one
//! consumer, so listeners observe events in the order they were posted. The
//! consumer is either a dedicated delivery thread ([`OutputRouter::dedicated`])
//! or a [`DeliveryPump`] the caller drains on a thread of its choosing
//! ([`OutputRouter::pumped`]).
//!
//! Listeners are looked up when an event is dispatched, not when it is posted:
//! replacing a listener redirects events that are queued but not yet
//! dispatched, and an event dispatched while no listener is registered is
//! dropped. Clearing or replacing a listener waits for a call already running
//! on the delivery context, so once it returns the old listener is never
//! invoked again. From inside a listener the wait is skipped; the listener may
//! clear or replace itself.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use log::{trace, warn};

use crate::e_diagnostic::CompileDiagnostic;

type OutputFn = dyn Fn(&str) + Send + Sync;
type DiagnosticFn = dyn Fn(&CompileDiagnostic) + Send + Sync;

enum Envelope {
    Output(String),
    Diagnostic(CompileDiagnostic),
    Barrier(Sender<()>),
}

/// Which listener slot a registration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Output,
    Diagnostic,
}

thread_local! {
    /// Address of the `Listeners` being dispatched on this thread, or 0.
    static DISPATCHING: Cell<usize> = const { Cell::new(0) };
}

struct Slot<T: ?Sized> {
    current: Mutex<Option<(u64, Arc<T>)>>,
    // Held for the duration of a listener call.
    calling: Mutex<()>,
}

impl<T: ?Sized> Slot<T> {
    fn new() -> Self {
        Slot {
            current: Mutex::new(None),
            calling: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<(u64, Arc<T>)>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self) -> MutexGuard<'_, ()> {
        self.calling.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<Arc<T>> {
        self.lock().as_ref().map(|(_, listener)| Arc::clone(listener))
    }

    fn replace(&self, id: u64, listener: Arc<T>) {
        *self.lock() = Some((id, listener));
    }

    fn clear(&self) {
        *self.lock() = None;
    }

    fn is_current(&self, id: u64) -> bool {
        matches!(self.lock().as_ref(), Some((current, _)) if *current == id)
    }

    fn clear_if_current(&self, id: u64) -> bool {
        let mut slot = self.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

struct Listeners {
    next_id: AtomicU64,
    output: Slot<OutputFn>,
    diagnostic: Slot<DiagnosticFn>,
}

impl Listeners {
    fn new() -> Self {
        Listeners {
            next_id: AtomicU64::new(1),
            output: Slot::new(),
            diagnostic: Slot::new(),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn key(&self) -> usize {
        self as *const Listeners as usize
    }

    /// Wait out a listener call running on another thread. On the delivery
    /// context itself the only running call is the caller's own.
    fn settle<T: ?Sized>(&self, slot: &Slot<T>) {
        if DISPATCHING.with(Cell::get) != self.key() {
            drop(slot.begin_call());
        }
    }

    fn set<T: ?Sized>(&self, slot: &Slot<T>, id: u64, listener: Arc<T>) {
        slot.replace(id, listener);
        self.settle(slot);
    }

    fn clear<T: ?Sized>(&self, slot: &Slot<T>) {
        slot.clear();
        self.settle(slot);
    }

    fn revoke<T: ?Sized>(&self, slot: &Slot<T>, id: u64) -> bool {
        let revoked = slot.clear_if_current(id);
        if revoked {
            self.settle(slot);
        }
        revoked
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Output(message) => {
                let _call = self.output.begin_call();
                match self.output.listener() {
                    Some(listener) => listener(message.as_str()),
                    None => trace!("no output listener; dropped {:?}", message),
                }
            }
            Envelope::Diagnostic(diagnostic) => {
                let _call = self.diagnostic.begin_call();
                match self.diagnostic.listener() {
                    Some(listener) => listener(&diagnostic),
                    None => trace!("no diagnostic listener; dropped {}", diagnostic),
                }
            }
            Envelope::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }

    /// A panicking listener must not take the delivery context down with it.
    fn deliver(&self, envelope: Envelope) {
        let outer = DISPATCHING.with(|current| current.replace(self.key()));
        if panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(envelope))).is_err() {
            warn!("listener panicked while handling a compiler event");
        }
        DISPATCHING.with(|current| current.set(outer));
    }
}

/// Registration returned by the `set_*_listener` calls.
///
/// A handle only ever affects the registration it was issued for: revoking
/// it after the listener has been replaced is a no-op.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    listeners: Weak<Listeners>,
    channel: Channel,
    id: u64,
}

impl ListenerHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// True while this registration is the one dispatch would use.
    pub fn is_active(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        match self.channel {
            Channel::Output => listeners.output.is_current(self.id),
            Channel::Diagnostic => listeners.diagnostic.is_current(self.id),
        }
    }

    /// Unregister the listener if it is still current. Returns whether it was.
    pub fn revoke(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        match self.channel {
            Channel::Output => listeners.revoke(&listeners.output, self.id),
            Channel::Diagnostic => listeners.revoke(&listeners.diagnostic, self.id),
        }
    }
}

/// Posting side of the router, cloned into every native sink.
#[derive(Clone)]
pub struct RouterSender {
    tx: Sender<Envelope>,
}

impl RouterSender {
    /// Returns false once the delivery context has gone away.
    pub fn post_output(&self, message: String) -> bool {
        self.tx.send(Envelope::Output(message)).is_ok()
    }

    pub fn post_diagnostic(&self, diagnostic: CompileDiagnostic) -> bool {
        self.tx.send(Envelope::Diagnostic(diagnostic)).is_ok()
    }
}

impl std::fmt::Debug for RouterSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSender").finish_non_exhaustive()
    }
}

/// Result of one [`DeliveryPump::pump_timeout`] round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// This many events were dispatched.
    Delivered(usize),
    /// Nothing arrived before the timeout.
    Idle,
    /// Every sender is gone; nothing will ever arrive again.
    Closed,
}

/// Consumer end of the router, drained on the delivery context.
pub struct DeliveryPump {
    rx: Receiver<Envelope>,
    listeners: Arc<Listeners>,
}

impl DeliveryPump {
    /// Dispatch until every sender has been dropped.
    pub fn run(self) {
        while let Ok(envelope) = self.rx.recv() {
            self.listeners.deliver(envelope);
        }
        trace!("delivery context closed");
    }

    /// Dispatch everything already queued without waiting.
    pub fn pump_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    self.listeners.deliver(envelope);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }

    /// Wait up to `timeout` for an event, then drain whatever else is queued.
    pub fn pump_timeout(&self, timeout: Duration) -> PumpStatus {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => {
                self.listeners.deliver(envelope);
                PumpStatus::Delivered(1 + self.pump_pending())
            }
            Err(RecvTimeoutError::Timeout) => PumpStatus::Idle,
            Err(RecvTimeoutError::Disconnected) => PumpStatus::Closed,
        }
    }
}

impl std::fmt::Debug for DeliveryPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPump").finish_non_exhaustive()
    }
}

/// Routes output messages and diagnostics to at most one listener each.
pub struct OutputRouter {
    sender: RouterSender,
    listeners: Arc<Listeners>,
}

impl OutputRouter {
    /// Router whose events are delivered on a dedicated `pawnc-delivery` thread.
    pub fn dedicated() -> anyhow::Result<Self> {
        let (router, pump) = Self::pumped();
        thread::Builder::new()
            .name("pawnc-delivery".to_string())
            .spawn(move || pump.run())
            .context("failed to spawn the delivery thread")?;
        Ok(router)
    }

    /// Router whose events are delivered wherever the returned pump is drained.
    pub fn pumped() -> (Self, DeliveryPump) {
        let (tx, rx) = mpsc::channel();
        let listeners = Arc::new(Listeners::new());
        let pump = DeliveryPump {
            rx,
            listeners: Arc::clone(&listeners),
        };
        let router = OutputRouter {
            sender: RouterSender { tx },
            listeners,
        };
        (router, pump)
    }

    pub fn sender(&self) -> RouterSender {
        self.sender.clone()
    }

    pub fn post_output(&self, message: String) -> bool {
        self.sender.post_output(message)
    }

    pub fn post_diagnostic(&self, diagnostic: CompileDiagnostic) -> bool {
        self.sender.post_diagnostic(diagnostic)
    }

    /// Replace the output listener. Takes effect for every event dispatched after
    /// this returns, including ones already queued. Waits for a call of the
    /// previous listener in progress on another thread.
    pub fn set_output_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.listeners.allocate_id();
        self.listeners
            .set(&self.listeners.output, id, Arc::new(listener) as Arc<OutputFn>);
        self.handle(Channel::Output, id)
    }

    pub fn set_diagnostic_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&CompileDiagnostic) + Send + Sync + 'static,
    {
        let id = self.listeners.allocate_id();
        self.listeners.set(
            &self.listeners.diagnostic,
            id,
            Arc::new(listener) as Arc<DiagnosticFn>,
        );
        self.handle(Channel::Diagnostic, id)
    }

    pub fn clear_output_listener(&self) {
        self.listeners.clear(&self.listeners.output);
    }

    pub fn clear_diagnostic_listener(&self) {
        self.listeners.clear(&self.listeners.diagnostic);
    }

    pub fn clear_listeners(&self) {
        self.clear_output_listener();
        self.clear_diagnostic_listener();
    }

    /// Block until every event posted before this call has been dispatched.
    ///
    /// Must not be called from the delivery context itself; with a pumped
    /// router some other thread has to be draining the pump.
    pub fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.sender.tx.send(Envelope::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv().is_ok()
    }

    fn handle(&self, channel: Channel, id: u64) -> ListenerHandle {
        ListenerHandle {
            listeners: Arc::downgrade(&self.listeners),
            channel,
            id,
        }
    }
}

impl std::fmt::Debug for OutputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRouter")
            .field("output_listener", &self.listeners.output.lock().is_some())
            .field(
                "diagnostic_listener",
                &self.listeners.diagnostic.lock().is_some(),
            )
            .finish()
    }
}
