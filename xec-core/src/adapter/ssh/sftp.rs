//! SFTP-backed file transfer over a pooled SSH connection.

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::pool::Lease;
use crate::adapter::adapter_err;
use crate::error::Result;

async fn open_sftp(lease: &Lease) -> Result<SftpSession> {
    let channel = lease
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| adapter_err("ssh", "sftp_open", e))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| adapter_err("ssh", "sftp_open", e))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| adapter_err("ssh", "sftp_open", e))
}

/// Uploads a single local file or, recursively, an entire local directory
/// tree, preserving permission bits.
pub async fn copy_to(lease: &Lease, local: &Path, remote: &str) -> Result<()> {
    let sftp = open_sftp(lease).await?;
    copy_to_inner(&sftp, local, remote).await
}

fn copy_to_inner<'a>(
    sftp: &'a SftpSession,
    local: &'a Path,
    remote: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let metadata = tokio::fs::metadata(local)
            .await
            .map_err(|e| adapter_err("ssh", "sftp_stat_local", e))?;

        if metadata.is_dir() {
            sftp.create_dir(remote).await.ok();
            let mut entries = tokio::fs::read_dir(local)
                .await
                .map_err(|e| adapter_err("ssh", "sftp_readdir", e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| adapter_err("ssh", "sftp_readdir", e))?
            {
                let child_remote = format!("{}/{}", remote, entry.file_name().to_string_lossy());
                copy_to_inner(sftp, &entry.path(), &child_remote).await?;
            }
            Ok(())
        } else {
            let data = tokio::fs::read(local)
                .await
                .map_err(|e| adapter_err("ssh", "sftp_read_local", e))?;
            let mut remote_file = sftp
                .create(remote)
                .await
                .map_err(|e| adapter_err("ssh", "sftp_create", e))?;
            remote_file
                .write_all(&data)
                .await
                .map_err(|e| adapter_err("ssh", "sftp_write", e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = metadata.permissions().mode();
                let _ = sftp.set_metadata(remote, russh_sftp::protocol::FileAttributes {
                    permissions: Some(mode),
                    ..Default::default()
                }).await;
            }
            Ok(())
        }
    })
}

/// Downloads a single remote file. Directory download follows the same
/// recursive listing pattern but is omitted here in favor of the common
/// single-file case; callers needing a full tree should enumerate with
/// `read_dir` and call this per entry.
pub async fn copy_from(lease: &Lease, remote: &str, local: &Path) -> Result<()> {
    let sftp = open_sftp(lease).await?;
    let mut remote_file = sftp
        .open(remote)
        .await
        .map_err(|e| adapter_err("ssh", "sftp_open_remote", e))?;
    let mut data = Vec::new();
    remote_file
        .read_to_end(&mut data)
        .await
        .map_err(|e| adapter_err("ssh", "sftp_read_remote", e))?;
    if let Some(parent) = local.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::write(local, data)
        .await
        .map_err(|e| adapter_err("ssh", "sftp_write_local", e))
}
