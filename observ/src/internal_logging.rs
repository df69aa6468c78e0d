#![allow(unused_macros)]
//! Self-diagnostics for the pipeline.
//!
//! The `obs_debug!`, `obs_info!`, `obs_warn!` and `obs_error!` macros report
//! what the pipeline itself is doing: worker lifecycle, flush reasons, dropped
//! entries and isolated sink failures. They are meant for this crate and for
//! sink implementations, not for application logging; application logs go
//! through [`Observer`](crate::Observer).
//!
//! With the `internal-logs` feature (on by default) the events are routed to
//! `tracing` with the crate name as target. Under `cfg(test)` they are also
//! printed, so `cargo test -- --nocapture` shows the worker's side of a test.
//!
//! Every value passed to these macros must implement `Display`.

/// Report a diagnostic at info level.
///
/// ```rust
/// use observ::obs_info;
/// obs_info!(name: "Observer.Started", buffer_capacity = 1000);
/// ```
#[macro_export]
macro_rules! obs_info {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("obs_info: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = %$value),+);
        }

        #[cfg(test)]
        {
            print!("obs_info: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $(&$value),+);
        }
    };
}

/// Report a diagnostic at warn level.
///
/// ```rust
/// use observ::obs_warn;
/// obs_warn!(name: "IngestionBuffer.EntryDropped", capacity = 2);
/// ```
#[macro_export]
macro_rules! obs_warn {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("obs_warn: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = %$value),+);
        }

        #[cfg(test)]
        {
            print!("obs_warn: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $(&$value),+);
        }
    };
}

/// Report a diagnostic at debug level.
///
/// ```rust
/// use observ::obs_debug;
/// obs_debug!(name: "FlushScheduler.ExportingDueToTimer", entries = 12);
/// ```
#[macro_export]
macro_rules! obs_debug {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("obs_debug: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = %$value),+);
        }

        #[cfg(test)]
        {
            print!("obs_debug: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $(&$value),+);
        }
    };
}

/// Report a diagnostic at error level.
///
/// ```rust
/// use observ::obs_error;
/// obs_error!(name: "SinkSet.WriteFailed", sink_index = 0, error = "broken pipe");
/// ```
#[macro_export]
macro_rules! obs_error {
    (name: $name:expr $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name);
        }

        #[cfg(test)]
        {
            print!("obs_error: name={}\n", $name);
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = $name;
        }
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = %$value),+);
        }

        #[cfg(test)]
        {
            print!("obs_error: name={}", $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )+
            print!("\n");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $(&$value),+);
        }
    };
}
