//! Interactive PTY shell channels on an authenticated hop.
//!
//! The channel is split after the shell request: the write half backs
//! [`ChannelWriter`], the read half is drained by a background task that
//! turns channel messages into [`ShellEvent`]s.

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::transport::handler::ChainHandler;
use crate::transport::traits::{ShellChannel, ShellEvent, ShellRequest, ShellStream};
use crate::types::ShellSize;

/// Write handle for sending input to a shell channel.
pub(crate) struct ChannelWriter {
    write_half: ChannelWriteHalf<client::Msg>,
}

impl ChannelWriter {
    pub(crate) fn new(write_half: ChannelWriteHalf<client::Msg>) -> Self {
        Self { write_half }
    }
}

#[async_trait]
impl ShellChannel for ChannelWriter {
    async fn write(&self, data: &[u8]) -> SessionResult<()> {
        self.write_half
            .data(data)
            .await
            .map_err(|e| SessionError::new(format!("Failed to write to shell: {}", e)))
    }

    async fn resize(&self, size: ShellSize) -> SessionResult<()> {
        Ok(self
            .write_half
            .window_change(size.col, size.row, size.width, size.height)
            .await?)
    }

    async fn close(&self) -> SessionResult<()> {
        Ok(self.write_half.close().await?)
    }
}

/// Open a session channel, request a PTY and a shell on it.
pub(crate) async fn open_shell_channel(
    handle: &client::Handle<ChainHandler>,
    request: ShellRequest,
) -> SessionResult<ShellStream> {
    let channel = handle.channel_open_session().await?;

    for (name, value) in &request.envs {
        // Servers commonly refuse env requests outside AcceptEnv
        if let Err(e) = channel.set_env(false, name.as_str(), value.as_str()).await {
            debug!("Failed to set shell env {}: {}", name, e);
        }
    }

    channel
        .request_pty(
            true,
            &request.term,
            request.size.col,
            request.size.row,
            request.size.width,
            request.size.height,
            &[],
        )
        .await?;
    channel.request_shell(true).await?;

    let (read_half, write_half) = channel.split();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_shell_output(read_half, events_tx));

    Ok(ShellStream {
        channel: Box::new(ChannelWriter::new(write_half)),
        events: events_rx,
    })
}

async fn pump_shell_output(
    mut read_half: ChannelReadHalf,
    events: mpsc::UnboundedSender<ShellEvent>,
) {
    loop {
        let event = match read_half.wait().await {
            Some(ChannelMsg::Data { data }) => ShellEvent::Data(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, .. }) => ShellEvent::Data(data.to_vec()),
            Some(ChannelMsg::Eof) => ShellEvent::Eof,
            Some(ChannelMsg::Close) | None => {
                let _ = events.send(ShellEvent::Close);
                break;
            }
            Some(ChannelMsg::Failure) => {
                warn!("Shell request refused by server");
                continue;
            }
            Some(_) => continue,
        };
        if events.send(event).is_err() {
            debug!("Shell output receiver dropped");
            break;
        }
    }
}
