//! Draining the logger when the process is told to terminate.
//!
//! With [`crate::LoggerBuilder::drain_on_termination`] enabled, the handled
//! signals get a handler that closes the transfer queue, waits a bounded time
//! for the dispatcher to drain it and close the sinks, and then hands the
//! signal on to whatever was installed before. A default disposition is
//! restored and the signal raised again. Signals the process ignores are
//! left alone. Shutting the logger down restores the previous handlers.
//!
//! The handlers are process-wide, so only one logger at a time can own them.

use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{self, pthread_sigmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};

use crate::dispatcher::Shared;
use crate::error::ConfigError;
use crate::record::Arg;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;
use crate::signal::SignalLogger;

/// Signals that trigger a drain.
pub const TERMINATION_SIGNALS: [Signal; 4] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGQUIT, Signal::SIGHUP];

/// Time past the drain timeout allowed for closing sinks.
const CLOSE_GRACE: Duration = Duration::from_millis(500);
/// Longest a handler waits for an install in progress to publish its state.
const INSTALL_WAIT: Duration = Duration::from_millis(100);
const WAIT_STEP: Duration = Duration::from_millis(1);

struct DrainState {
    shared: Arc<Shared>,
    log: SignalLogger,
    /// Action replaced on each signal, `None` where the signal was ignored.
    previous: [Option<SigAction>; 4],
}

static CLAIMED: AtomicBool = AtomicBool::new(false);
static ACTIVE: AtomicPtr<DrainState> = AtomicPtr::new(ptr::null_mut());
static IN_HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Ownership of the installed handlers. Dropping it restores the previous
/// actions.
pub(crate) struct TerminationHandlers {
    budget: Duration,
}

impl TerminationHandlers {
    pub(crate) fn install(shared: &Arc<Shared>) -> Result<Self, ConfigError> {
        if CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::TerminationHandlersInUse);
        }

        // Blocked here so a handler never waits on the thread publishing its state.
        let mut blocked = SigSet::empty();
        for signal in TERMINATION_SIGNALS {
            blocked.add(signal);
        }
        let mut saved_mask = SigSet::empty();
        if let Err(errno) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut saved_mask)) {
            CLAIMED.store(false, Ordering::Release);
            return Err(ConfigError::SignalAction(errno));
        }

        let installed = replace_actions();
        if let Ok(previous) = &installed {
            let state = Box::new(DrainState {
                shared: Arc::clone(shared),
                log: SignalLogger::new(Arc::clone(shared)),
                previous: *previous,
            });
            ACTIVE.store(Box::into_raw(state), Ordering::SeqCst);
        } else {
            CLAIMED.store(false, Ordering::Release);
        }
        let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&saved_mask), None);

        let previous = installed?;
        tracing::debug!(
            handled = previous.iter().filter(|action| action.is_some()).count(),
            "termination handlers installed"
        );
        Ok(Self {
            budget: shared.drain_timeout + CLOSE_GRACE + INSTALL_WAIT,
        })
    }
}

impl Drop for TerminationHandlers {
    fn drop(&mut self) {
        let state = ACTIVE.load(Ordering::SeqCst);
        if state.is_null() {
            CLAIMED.store(false, Ordering::Release);
            return;
        }
        // SAFETY: only this owner frees the state, and not before this point.
        let previous = unsafe { (*state).previous };
        restore_actions(&previous);
        ACTIVE.store(ptr::null_mut(), Ordering::SeqCst);

        let start = Instant::now();
        while IN_HANDLER.load(Ordering::SeqCst) != 0 && start.elapsed() < self.budget {
            thread::sleep(WAIT_STEP);
        }
        if IN_HANDLER.load(Ordering::SeqCst) == 0 {
            // SAFETY: unpublished, and no handler holds a reference.
            drop(unsafe { Box::from_raw(state) });
        } else {
            tracing::warn!("termination handler still running, leaking its state");
        }
        CLAIMED.store(false, Ordering::Release);
        tracing::debug!("termination handlers restored");
    }
}

fn replace_actions() -> Result<[Option<SigAction>; 4], ConfigError> {
    let action = SigAction::new(
        SigHandler::SigAction(drain_and_forward),
        SaFlags::SA_SIGINFO | SaFlags::SA_RESTART,
        SigSet::all(),
    );
    let mut previous = [None; 4];
    for (slot, signal) in previous.iter_mut().zip(TERMINATION_SIGNALS) {
        // SAFETY: the handler only does async-signal-safe work.
        let replaced = unsafe { signal::sigaction(signal, &action) }.and_then(|old| {
            if matches!(old.handler(), SigHandler::SigIgn) {
                // SAFETY: puts back the action that was there.
                unsafe { signal::sigaction(signal, &old) }.map(|_| None)
            } else {
                Ok(Some(old))
            }
        });
        match replaced {
            Ok(old) => *slot = old,
            Err(errno) => {
                restore_actions(&previous);
                return Err(ConfigError::SignalAction(errno));
            }
        }
    }
    Ok(previous)
}

fn restore_actions(previous: &[Option<SigAction>; 4]) {
    for (old, signal) in previous.iter().zip(TERMINATION_SIGNALS) {
        if let Some(old) = old {
            // SAFETY: reinstalls the action found at install time.
            if let Err(errno) = unsafe { signal::sigaction(signal, old) } {
                tracing::warn!(?signal, %errno, "could not restore signal action");
            }
        }
    }
}

/// Waits for published state, counting this handler as in flight while it
/// holds the reference. `None` once the handlers are gone.
fn enter() -> Option<&'static DrainState> {
    let start = Instant::now();
    loop {
        IN_HANDLER.fetch_add(1, Ordering::SeqCst);
        let state = ACTIVE.load(Ordering::SeqCst);
        if !state.is_null() {
            // SAFETY: not freed while IN_HANDLER is non-zero.
            return Some(unsafe { &*state });
        }
        IN_HANDLER.fetch_sub(1, Ordering::SeqCst);
        if !CLAIMED.load(Ordering::Acquire) || start.elapsed() >= INSTALL_WAIT {
            return None;
        }
        hint::spin_loop();
    }
}

extern "C" fn drain_and_forward(signo: c_int, info: *mut siginfo_t, context: *mut c_void) {
    let Ok(signal) = Signal::try_from(signo) else {
        return;
    };
    let Some(state) = enter() else {
        // Already restored: the previous action runs once this returns.
        let _ = signal::raise(signal);
        return;
    };
    let index = TERMINATION_SIGNALS.iter().position(|handled| *handled == signal);
    let previous = index.and_then(|index| state.previous[index]);

    if let Some(previous) = previous {
        drain(state, signo);
        match previous.handler() {
            SigHandler::SigDfl => {
                // SAFETY: reinstates the default action before re-raising.
                if unsafe { signal::sigaction(signal, &previous) }.is_ok() {
                    let _ = signal::raise(signal);
                }
            }
            SigHandler::SigIgn => {}
            SigHandler::Handler(handler) => handler(signo),
            SigHandler::SigAction(handler) => handler(signo, info, context),
        }
    }
    IN_HANDLER.fetch_sub(1, Ordering::SeqCst);
}

fn drain(state: &DrainState, signo: c_int) {
    let _ = state.log.log(
        Severity::Warn,
        ChannelId::DEFAULT,
        TagSet::EMPTY,
        "terminating on signal {}",
        &[Arg::I64(i64::from(signo))],
    );
    let shared = &state.shared;
    shared.queue.close();
    let budget = shared.drain_timeout + CLOSE_GRACE;
    let start = Instant::now();
    while !shared.stopped.load(Ordering::Acquire) && start.elapsed() < budget {
        thread::sleep(WAIT_STEP);
    }
}
