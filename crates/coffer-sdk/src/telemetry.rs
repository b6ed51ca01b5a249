//! Log output for binaries embedding Coffer.

use tracing::Level;

/// Install a `fmt` subscriber at `INFO`. Returns `false` if a global
/// subscriber was already set, which is not an error.
pub fn init() -> bool {
    init_with_level(Level::INFO)
}

/// Install a `fmt` subscriber capped at `level`.
pub fn init_with_level(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}
