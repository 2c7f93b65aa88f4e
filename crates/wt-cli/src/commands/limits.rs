//! Limits command for viewing and editing per-bucket daily budgets.

use std::io::Write;

use anyhow::Result;

use wt_core::{Bucket, Store};

use crate::cli::LimitsAction;

/// Shows or edits the per-bucket daily limits.
///
/// Edits are whole-value writes of the settings record. A running
/// daemon picks the change up on its next tick.
pub async fn run<W: Write, S: Store>(
    writer: &mut W,
    store: S,
    action: Option<LimitsAction>,
) -> Result<()> {
    match action {
        None | Some(LimitsAction::Show) => show(writer, &store).await,
        Some(LimitsAction::Set { bucket, minutes }) => set(writer, &store, bucket, minutes).await,
        Some(LimitsAction::Clear { bucket }) => clear(writer, &store, bucket).await,
    }
}

async fn show<W: Write, S: Store>(writer: &mut W, store: &S) -> Result<()> {
    let settings = store.load_settings().await?.unwrap_or_default();
    writeln!(writer, "Daily limits")?;
    for bucket in Bucket::ALL {
        match settings.limit_minutes.get(&bucket) {
            Some(minutes) => writeln!(writer, "- {bucket}: {minutes}m")?,
            None => writeln!(writer, "- {bucket}: no limit")?,
        }
    }
    Ok(())
}

async fn set<W: Write, S: Store>(
    writer: &mut W,
    store: &S,
    bucket: Bucket,
    minutes: i64,
) -> Result<()> {
    anyhow::ensure!(minutes > 0, "limit must be a positive number of minutes");
    let mut settings = store.load_settings().await?.unwrap_or_default();
    settings.set_limit_minutes(bucket, minutes);
    store.save_settings(&settings).await?;
    writeln!(writer, "{bucket}: {minutes}m")?;
    Ok(())
}

async fn clear<W: Write, S: Store>(writer: &mut W, store: &S, bucket: Bucket) -> Result<()> {
    let mut settings = store.load_settings().await?.unwrap_or_default();
    settings.clear_limit(bucket);
    store.save_settings(&settings).await?;
    writeln!(writer, "{bucket}: no limit")?;
    Ok(())
}
