//! Wall-clock deadline sleep that tolerates arbitrarily distant deadlines.

use std::time::Duration;

use crate::store::now_millis;

/// Longest single timer armed at once; longer waits are re-armed in chunks.
pub(crate) const MAX_TIMER_CHUNK: Duration = Duration::from_secs(24 * 60 * 60);

/// Sleep until the Unix-millisecond deadline `due`.
///
/// Waits are split into chunks of at most [`MAX_TIMER_CHUNK`] and the wall
/// clock is re-read after each one, so far-future deadlines and clock jumps
/// are both handled.
pub(crate) async fn sleep_until_millis(due: i64) {
    loop {
        let now = now_millis();
        if now >= due {
            return;
        }
        tokio::time::sleep(chunk(due - now)).await;
    }
}

fn chunk(remaining_ms: i64) -> Duration {
    Duration::from_millis(remaining_ms.max(0) as u64).min(MAX_TIMER_CHUNK)
}
