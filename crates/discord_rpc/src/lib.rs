mod client;
mod transport;

pub use client::DiscordRpcClient;
pub use transport::DiscordTransport;

use std::time::Duration;

/// Whether a local Discord client is listening on any IPC slot or RPC port.
pub async fn endpoint_reachable() -> bool {
    #[cfg(unix)]
    {
        for slot in client::IPC_SLOTS {
            if client::ipc_candidates(slot).into_iter().any(|p| p.exists()) {
                return true;
            }
        }
    }

    for port in client::PORTS {
        let addr = format!("127.0.0.1:{port}");
        if tokio::time::timeout(
            Duration::from_millis(200),
            tokio::net::TcpStream::connect(addr),
        )
        .await
        .ok()
        .and_then(Result::ok)
        .is_some()
        {
            return true;
        }
    }
    false
}
