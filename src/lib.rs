/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("deploy", "Uploading {} to {}", artifact, host);
/// log_status!("test", "Running {}", target);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod output;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `deckhand::context` instead of `deckhand::core::context`
pub use core::*;
pub use utils::*;
