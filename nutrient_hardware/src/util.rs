use std::time::Duration;

use crate::error::{HwError, Result};
use nutrient_traits::clock::Clock;

/// Wait until the provided `is_busy` predicate becomes false, or a timeout
/// expires. Sleeps in small intervals to avoid CPU spinning. Used to poll an
/// EEPROM's internal write cycle to completion after `write()` returns.
pub fn wait_until_ready_with_timeout(
    mut is_busy: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
    clock: &dyn Clock,
) -> Result<()> {
    let start = clock.now();
    while is_busy() {
        if clock.ms_since(start) >= timeout.as_millis() as u64 {
            return Err(HwError::WriteTimeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}
