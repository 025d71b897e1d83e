//! Sudo escalation for remote commands.
//!
//! `secure-askpass` is the recommended method: a short-lived script on the
//! remote side echoes the password so it never touches argv or shell
//! history, and the script is deleted unconditionally once the command
//! finishes, regardless of outcome.

use uuid::Uuid;

use super::pool::Lease;
use crate::adapter::adapter_err;
use crate::command::{SudoConfig, SudoMethod};
use crate::error::{Result, XecError};

/// Wraps `command_line` so it runs under `sudo` per `config.method`.
/// Returns the wrapped line and, for `secure-askpass`, the remote path of
/// the uploaded script that must be removed after the command completes.
pub async fn wrap_with_sudo(
    lease: &Lease,
    config: &SudoConfig,
    command_line: &str,
) -> Result<(String, Option<String>)> {
    let password = config.password.as_deref().ok_or_else(|| {
        XecError::Validation("sudo is enabled but no password was provided".to_string())
    })?;

    match config.method {
        SudoMethod::Stdin => {
            let wrapped = format!(
                "echo {} | sudo -S -p '' {}",
                crate::escape::posix_quote(password),
                command_line
            );
            Ok((wrapped, None))
        }
        SudoMethod::Askpass | SudoMethod::SecureAskpass => {
            let script_path = format!("/tmp/.xec-askpass-{}", Uuid::new_v4());
            let script = format!("#!/bin/sh\necho {}\n", crate::escape::posix_quote(password));
            upload_script(lease, &script_path, &script).await?;
            let wrapped = format!(
                "SUDO_ASKPASS={} sudo -A {}",
                crate::escape::posix_quote(&script_path),
                command_line
            );
            Ok((wrapped, Some(script_path)))
        }
        SudoMethod::Echo => {
            tracing::warn!("sudo method `echo` exposes the password to process listings; prefer secure-askpass");
            let wrapped = format!(
                "echo {} | sudo -S {}",
                crate::escape::posix_quote(password),
                command_line
            );
            Ok((wrapped, None))
        }
    }
}

async fn upload_script(lease: &Lease, remote_path: &str, contents: &str) -> Result<()> {
    let mut channel = lease
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| adapter_err("ssh", "sudo_upload", e))?;
    let write_cmd = format!(
        "cat > {} && chmod 0700 {}",
        crate::escape::posix_quote(remote_path),
        crate::escape::posix_quote(remote_path)
    );
    channel
        .exec(true, write_cmd)
        .await
        .map_err(|e| adapter_err("ssh", "sudo_upload", e))?;
    channel
        .data(contents.as_bytes())
        .await
        .map_err(|e| adapter_err("ssh", "sudo_upload", e))?;
    channel.eof().await.ok();
    while let Some(msg) = channel.wait().await {
        if matches!(msg, russh::ChannelMsg::Close | russh::ChannelMsg::Eof) {
            break;
        }
    }
    Ok(())
}

/// Deletes the askpass script unconditionally, regardless of whether the
/// command it served succeeded, failed, or was cancelled.
pub async fn remove_askpass_script(lease: &Lease, remote_path: &str) -> Result<()> {
    let mut channel = lease
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| adapter_err("ssh", "sudo_cleanup", e))?;
    channel
        .exec(true, format!("rm -f {}", crate::escape::posix_quote(remote_path)))
        .await
        .map_err(|e| adapter_err("ssh", "sudo_cleanup", e))?;
    while let Some(msg) = channel.wait().await {
        if matches!(msg, russh::ChannelMsg::Close | russh::ChannelMsg::Eof) {
            break;
        }
    }
    Ok(())
}
