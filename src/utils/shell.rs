use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::debug;

use crate::errors::CurtinError;

/// Default ceiling for one external tool invocation.
pub const TIMEOUT_TOOL: Duration = Duration::from_secs(60);

/// mkfs on large devices is slow but bounded.
pub const TIMEOUT_MKFS: Duration = Duration::from_secs(5 * 60);

/// Full-device zero/random wipes get the largest budget.
pub const TIMEOUT_WIPE: Duration = Duration::from_secs(10 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// Run `cmd` with `args`, capturing output.
/// Non-zero exit status is an error carrying the full invocation context.
pub fn exec(cmd: &str, args: &[&str]) -> Result<Output, CurtinError> {
    exec_opts(cmd, args, None, TIMEOUT_TOOL, &[0])
}

/// Like [`exec`], with a caller-chosen timeout.
pub fn exec_timeout(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<Output, CurtinError> {
    exec_opts(cmd, args, None, timeout, &[0])
}

/// Like [`exec`], but the listed exit codes are accepted as success.
pub fn exec_rcs(
    cmd: &str,
    args: &[&str],
    allowed: &[i32],
) -> Result<Output, CurtinError> {
    exec_opts(cmd, args, None, TIMEOUT_TOOL, allowed)
}

/// Like [`exec`], piping `input` to the child's stdin.
/// Used for tools that read secrets or scripts from stdin.
pub fn exec_stdin(
    cmd: &str,
    args: &[&str],
    input: &str,
) -> Result<Output, CurtinError> {
    exec_opts(cmd, args, Some(input), TIMEOUT_TOOL, &[0])
}

pub fn exec_opts(
    cmd: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
    allowed: &[i32],
) -> Result<Output, CurtinError> {
    let line = cmdline(cmd, args);
    debug!("exec: {line}");

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(match stdin {
            Some(_) => Stdio::piped(),
            None => Stdio::null(),
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CurtinError::CmdFailed {
            error: Some(err),
            context: format!("command failed to spawn: {line}"),
        })?;

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().expect("stdin was piped");
        pipe.write_all(input.as_bytes())
            .map_err(|err| CurtinError::CmdFailed {
                error: Some(err),
                context: format!("failed writing stdin to: {line}"),
            })?;
        // Dropping the pipe closes it so the child sees EOF
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Err(err) => {
                return Err(CurtinError::CmdFailed {
                    error: Some(err),
                    context: format!("failed waiting on: {line}"),
                });
            }

            Ok(Some(_)) => break,

            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CurtinError::CmdFailed {
                        error: None,
                        context: format!(
                            "command timed out after {timeout:?}: {line}"
                        ),
                    });
                }

                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|err| CurtinError::CmdFailed {
            error: Some(err),
            context: format!("failed collecting output of: {line}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let code = output.status.code().unwrap_or(-1);
    if !allowed.contains(&code) {
        return Err(CurtinError::CmdFailed {
            error: None,
            context: format!("{line}: exited {code}: {}", stderr.trim()),
        });
    }

    Ok(Output { stdout, stderr })
}

/// Full command line for diagnostics.
pub fn cmdline(cmd: &str, args: &[&str]) -> String {
    match args.is_empty() {
        true => cmd.to_string(),
        false => format!("{cmd} {}", args.join(" ")),
    }
}

pub fn in_path(cmd: &str) -> bool {
    let Ok(path_env) = std::env::var("PATH") else {
        return false;
    };

    for dir in path_env.split(':') {
        if std::path::Path::new(dir).join(cmd).exists() {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec() {
        let out = exec("echo", &["hello, world!"])
            .expect("failed to execute `echo \"hello, world!\"`");

        assert_eq!(out.stdout, "hello, world!\n");
    }

    #[test]
    fn test_exec_bad_status() {
        let err = exec("false", &[]).expect_err("false must fail");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exec_rcs() {
        exec_rcs("false", &[], &[0, 1]).expect("exit 1 was allowed");
    }

    #[test]
    fn test_exec_stdin() {
        let out = exec_stdin("cat", &[], "piped").expect("cat failed");
        assert_eq!(out.stdout, "piped");
    }

    #[test]
    fn test_exec_timeout() {
        let err = exec_opts(
            "sleep",
            &["5"],
            None,
            Duration::from_millis(100),
            &[0],
        )
        .expect_err("sleep must time out");

        let CurtinError::CmdFailed { context, .. } = err else {
            panic!("expected CmdFailed, got: {err:?}");
        };
        assert!(context.contains("timed out"));
    }
}
