//! Async driver for the selection [`Debouncer`].
//!
//! The rendering layer reports every intermediate selection while the user
//! drags; only the one that stays put for the quiet period is worth mapping.

use std::time::Instant;

use marginalia_core::Debouncer;
use tokio::sync::mpsc;

/// Wait for the next value that survives the quiet period.
///
/// Each new value restarts the period. When the sender goes away a pending
/// value is handed back at once; `None` means the channel is closed and
/// nothing was pending.
pub async fn settle<T>(events: &mut mpsc::Receiver<T>, debouncer: &mut Debouncer<T>) -> Option<T> {
    loop {
        let Some(deadline) = debouncer.deadline() else {
            let value = events.recv().await?;
            debouncer.push(value, Instant::now());
            continue;
        };

        tokio::select! {
            received = events.recv() => match received {
                Some(value) => debouncer.push(value, Instant::now()),
                None => return debouncer.flush(),
            },
            _ = tokio::time::sleep_until(deadline.into()) => {
                if let Some(value) = debouncer.poll(Instant::now()) {
                    return Some(value);
                }
            }
        }
    }
}
