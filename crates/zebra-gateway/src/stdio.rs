use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use zebra_common::Result;

use crate::rpc;
use crate::state::AppState;

/// Serve newline-delimited requests from `reader`, writing one reply line per
/// request to `writer`. Blank lines are skipped. Returns at end of input.
pub async fn serve<R, W>(state: &AppState, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("serving RPC over stdio");
    let mut lines = reader.lines();
    let mut handled = 0_usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = rpc::dispatch_text(state, line).await;
        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        handled += 1;
    }

    debug!("stdio input closed after {handled} requests");
    Ok(())
}
