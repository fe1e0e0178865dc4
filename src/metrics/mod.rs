//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: optional Prometheus HTTP endpoint

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event.
///
/// Calls [`events::InternalEvent::emit`] on the given event, which records
/// the corresponding metric. Without an installed recorder this is a no-op.
///
/// ```ignore
/// use starflake::metrics::events::RecordsRead;
///
/// emit!(RecordsRead { source: "log_data", count: 100 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
