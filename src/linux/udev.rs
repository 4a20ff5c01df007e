use std::time::Duration;

use crate::errors::CurtinError;
use crate::utils::shell;

const TIMEOUT_SETTLE: Duration = Duration::from_secs(60);

/// Executes:
/// ```shell
/// udevadm settle
/// ```
/// Runs after every mutating action so the next probe sees the kernel's
/// final word on the topology.
pub fn settle() -> Result<(), CurtinError> {
    shell::exec_timeout("udevadm", &["settle"], TIMEOUT_SETTLE)?;
    Ok(())
}

/// Executes:
/// ```shell
/// udevadm trigger {device}
/// ```
/// followed by a settle, so freshly written tables surface their
/// partition nodes before the next action looks for them.
pub fn trigger(device: &str) -> Result<(), CurtinError> {
    shell::exec("udevadm", &["trigger", device])?;
    settle()
}
