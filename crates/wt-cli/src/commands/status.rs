//! Status command showing today's watch time against the limits.

use std::io::Write;

use anyhow::Result;

use wt_core::{Bucket, Engine, NullTransport, Store, SystemClock};

/// Renders today's totals for every bucket.
///
/// Uses the same aggregation the daemon answers `getLiveStats` with, so
/// the numbers here always agree with what agents see.
pub async fn run<W: Write, S: Store>(writer: &mut W, store: S) -> Result<()> {
    let mut engine = Engine::new(store, NullTransport, SystemClock);
    let (stats, limits) = engine.live_stats().await?;

    writeln!(writer, "Watch time today ({})", chrono::Local::now().date_naive())?;
    for bucket in Bucket::ALL {
        let spent = stats.get(&bucket).copied().unwrap_or(0);
        match limits.get(&bucket) {
            Some(minutes) => writeln!(
                writer,
                "- {bucket}: {} / {}",
                format_ms(spent),
                format_ms(minutes * 60_000)
            )?,
            None => writeln!(writer, "- {bucket}: {} (no limit)", format_ms(spent))?,
        }
    }
    Ok(())
}

/// Renders milliseconds as `1h 05m 30s`, dropping leading zero units.
fn format_ms(ms: i64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {secs:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}
