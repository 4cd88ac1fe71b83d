// Wall-clock helpers shared by the logging macros and anything that wants a
// cheap timestamp without pulling in a dedicated time crate.
//
// Austin Shafer - 2020

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating instead of panicking if the
/// system clock is set before 1970.
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
