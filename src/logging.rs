//! Helper macros enforcing consistent feed log fields.
//!
//! Every event emitted from the feed and delivery layers carries a `trigger` and/or a
//! `connection` label so downstream parsing can correlate receivers with their shared
//! connections. Labels never contain credentials.

/// Log an event for a trigger/connection pair plus any extra fields.
#[macro_export]
macro_rules! feed_event {
    ($level:ident, $target:expr, $event:expr, trigger = $trigger:expr, connection = $connection:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            trigger = %$trigger,
            connection = %$connection,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, trigger = $trigger:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            trigger = %$trigger,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, connection = $connection:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            connection = %$connection,
            $($field = %$value,)*
        )
    };
}
