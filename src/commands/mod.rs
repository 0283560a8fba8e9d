//! Command handlers. Each returns the process exit code on success.

pub mod notify;
pub mod start;
pub mod status;
pub mod stop;
pub mod validate;

/// Process environment lookup shared by the handlers.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
