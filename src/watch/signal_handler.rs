use super::supervisor::ControlEvent;
use crate::subprocess::streaming::{EventSender, MuxEvent};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::thread;
use tracing::debug;

/// Keeps SIGINT/SIGTERM routed into the supervisor queue until dropped
pub struct InterruptForwarder {
    handle: Handle,
}

/// Install handlers for SIGINT (Ctrl-C) and SIGTERM.
///
/// Both are reported as the same [`ControlEvent::Interrupt`]; the coordinator
/// decides what an interrupt means for the run.
pub fn forward_interrupts(events: EventSender<ControlEvent>) -> io::Result<InterruptForwarder> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = signals.handle();

    thread::spawn(move || {
        for sig in signals.forever() {
            debug!("Received signal {}", sig);
            if events
                .blocking_send(MuxEvent::Control(ControlEvent::Interrupt))
                .is_err()
            {
                break;
            }
        }
    });

    Ok(InterruptForwarder { handle })
}

impl Drop for InterruptForwarder {
    fn drop(&mut self) {
        self.handle.close();
    }
}
