pub mod args;
mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
pub mod shutdown;
pub mod wait;

pub use error::EngineError;

/// Process-wide one-time setup: color output override.
/// Call once at the top of `main`, before `tracing_subscriber::fmt::init()`.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

pub fn signal_ready() {
    if let Ok(path) = std::env::var("READY_FILE") {
        let _ = std::fs::write(path, "ready");
    }
}
