//! ---
//! ezmb_section: "03-persistence-logging"
//! ezmb_subsection: "module"
//! ezmb_type: "source"
//! ezmb_scope: "code"
//! ezmb_description: "Context-enriched logging macros."
//! ezmb_version: "v0.0.0-prealpha"
//! ezmb_owner: "tbd"
//! ---
/// Emit an informational log enriched with gateway context.
#[macro_export]
macro_rules! ezmb_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            direction = ctx.direction.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ezmb_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with gateway context.
#[macro_export]
macro_rules! ezmb_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            direction = ctx.direction.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ezmb_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning log enriched with gateway context.
#[macro_export]
macro_rules! ezmb_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            direction = ctx.direction.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ezmb_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with gateway context.
#[macro_export]
macro_rules! ezmb_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            uid = ctx.uid.unwrap_or(""),
            topic = ctx.topic.unwrap_or(""),
            device = ctx.device.unwrap_or(""),
            direction = ctx.direction.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ezmb_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
