//! Local port forwarding (`direct-tcpip`) over a pooled SSH connection.

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::pool::Lease;
use crate::adapter::adapter_err;
use crate::error::Result;

/// A running local-forward tunnel. Dropping the handle does not stop the
/// forward; call [`Tunnel::close`] explicitly, matching the engine's
/// dispose-on-demand tracked-resource pattern.
pub struct Tunnel {
    pub local_port: u16,
    accept_task: JoinHandle<()>,
}

impl Tunnel {
    pub fn close(self) {
        self.accept_task.abort();
    }
}

/// Binds `local_port` (0 = OS-assigned) and forwards every accepted
/// connection to `(remote_host, remote_port)` via a fresh `direct-tcpip`
/// channel on `lease`'s connection.
pub async fn open(
    lease: &Lease,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
) -> Result<Tunnel> {
    let listener = TcpListener::bind(("127.0.0.1", local_port))
        .await
        .map_err(|e| adapter_err("ssh", "tunnel_bind", e))?;
    let bound_port = listener
        .local_addr()
        .map_err(|e| adapter_err("ssh", "tunnel_bind", e))?
        .port();

    let handle = lease.handle_arc();

    let accept_task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let handle = handle.clone();
            let remote_host = remote_host.clone();
            tokio::spawn(async move {
                let Ok(channel) = handle
                    .channel_open_direct_tcpip(remote_host, remote_port as u32, "127.0.0.1", 0)
                    .await
                else {
                    return;
                };
                let mut channel_stream = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await;
            });
        }
    });

    Ok(Tunnel {
        local_port: bound_port,
        accept_task,
    })
}
