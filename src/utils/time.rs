//! Elapsed time formatting

use std::time::Duration;

/// Human-readable elapsed time.
///
/// `"2m 5s"` past a minute, `"3.25s"` past a second, `"87ms"` otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let ms = total_ms % 1_000;

    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else if seconds > 0 {
        // round to centiseconds without spilling into the next second
        let centis = ((ms + 5) / 10).min(99);
        format!("{}.{:02}s", seconds, centis)
    } else {
        format!("{}ms", ms)
    }
}
