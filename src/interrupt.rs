//! Process signals → shutdown signal.

use tracing::{info, warn};

use crate::shutdown::{Shutdown, ShutdownReason};
use crate::{Error, Result};

/// Exit code used when a second signal cuts the drain short.
pub const FORCED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: orderly shutdown started.
    Shutdown,
    /// Shutdown was already under way; exit without waiting for it.
    ForceExit,
}

/// Decides what a received signal does.
pub fn on_signal(shutdown: &Shutdown) -> SignalAction {
    if shutdown.trigger(ShutdownReason::Interrupt) {
        SignalAction::Shutdown
    } else {
        SignalAction::ForceExit
    }
}

fn handle(shutdown: &Shutdown, name: &str) {
    match on_signal(shutdown) {
        SignalAction::Shutdown => info!(signal = name, "Interrupt received"),
        SignalAction::ForceExit => {
            warn!(signal = name, "Second interrupt, exiting without draining");
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
}

/// Forwards Ctrl-C (and SIGTERM on Unix) to `shutdown`.
///
/// Must be called from inside a Tokio runtime. Registration happens before
/// this returns so a failure is reported at startup. The forwarding task
/// keeps listening: a signal arriving once shutdown is under way ends the
/// process immediately, for a driver call that never returns.
pub fn install(shutdown: Shutdown) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).map_err(Error::Interrupt)?;
        let mut interrupt = signal(SignalKind::interrupt()).map_err(Error::Interrupt)?;
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    else => break,
                };
                handle(&shutdown, name);
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                handle(&shutdown, "ctrl-c");
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_signal_forces_exit() {
        let shutdown = Shutdown::new();
        assert_eq!(on_signal(&shutdown), SignalAction::Shutdown);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Interrupt));
        assert_eq!(on_signal(&shutdown), SignalAction::ForceExit);
    }

    #[test]
    fn signal_during_reload_drain_forces_exit() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::Reload);
        assert_eq!(on_signal(&shutdown), SignalAction::ForceExit);
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Reload));
    }
}
