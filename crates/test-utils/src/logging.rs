//! Counting warnings and errors emitted through `tracing`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// A layer counting WARN and ERROR events.
///
/// Counts are only seen for events on threads where the subscriber is the
/// default, so run the code under test serially.
///
/// ```ignore
/// let counter = WarnCounter::new();
/// tracing::subscriber::with_default(counter.subscriber(), || group_by_solar_day(&items));
/// assert_eq!(counter.warnings(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WarnCounter {
    warnings: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
}

impl WarnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// A subscriber with only this layer installed.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        tracing_subscriber::registry().with(self.clone())
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::WARN => {
                self.warnings.fetch_add(1, Ordering::SeqCst);
            }
            Level::ERROR => {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
