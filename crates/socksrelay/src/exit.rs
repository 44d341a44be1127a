//! Detect a "ctrl-c" notification or other reason to exit.

/// Wait until a control-c notification is received, using an appropriate
/// runtime mechanism.
///
/// This function can have pretty kludgy side-effects: see
/// documentation for `tokio::signal::ctrl_c` for warnings.
pub(crate) async fn wait_for_ctrl_c() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received a ctrl-c; stopping.");
    Ok(())
}
