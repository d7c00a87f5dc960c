//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing for the process.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

pub mod tracing;
