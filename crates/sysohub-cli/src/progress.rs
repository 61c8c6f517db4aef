//! Progress lines from reconciler events

use std::future::Future;

use tokio::sync::broadcast;
use tracing::debug;

use sysohub_core::ReconcileEvent;

/// Drive `operation` to completion, printing events as they arrive
///
/// Events still queued when the operation finishes are printed before
/// returning.
pub async fn with_progress<F: Future>(
    events: &mut broadcast::Receiver<ReconcileEvent>,
    operation: F,
) -> F::Output {
    tokio::pin!(operation);
    loop {
        tokio::select! {
            output = &mut operation => {
                while let Ok(event) = events.try_recv() {
                    print_event(&event);
                }
                return output;
            }
            Ok(event) = events.recv() => print_event(&event),
        }
    }
}

fn print_event(event: &ReconcileEvent) {
    match event {
        ReconcileEvent::StateChanged { .. } => debug!(%event, "run state"),
        _ => println!("==> {event}"),
    }
}
