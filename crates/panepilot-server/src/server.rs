//! Control socket: accepts local clients and answers line-delimited JSON.
//!
//! Each connection is served by its own task and may carry any number of
//! requests. A `subscribe` request turns the connection into an event
//! stream until the client goes away.

use crate::dispatch::Dispatcher;
use async_trait::async_trait;
use panepilot_core::{
    line_decode, line_encode, Command, LineDecoder, PilotResult, Request, Response,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8192;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ControlServer {
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
}

impl ControlServer {
    pub fn new(socket_path: PathBuf, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            socket_path,
            dispatcher,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one. The directory is created
    /// owner-only and the socket itself is `0600`.
    pub async fn bind(&self) -> PilotResult<UnixListener> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = self.socket_path.parent() {
            if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
                tokio::fs::create_dir_all(parent).await?;
                tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                    .await?;
            }
        }
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => debug!(path = %self.socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tokio::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .await?;
        Ok(listener)
    }

    /// Accept connections until the task is dropped. Accept errors are
    /// logged and retried after a short pause.
    pub async fn run(&self) -> PilotResult<()> {
        let listener = self.bind().await?;
        info!(socket = %self.socket_path.display(), "panepilotd ready");
        self.serve(listener).await;
        Ok(())
    }

    async fn serve<A: Acceptor>(&self, mut acceptor: A) {
        loop {
            let stream = match acceptor.accept_stream().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, dispatcher).await {
                    debug!(error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Remove the socket file and stop background typing tasks.
    pub async fn shutdown(&self) {
        self.dispatcher.typing().stop_all();
        if let Err(e) = tokio::fs::remove_file(&self.socket_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove control socket");
            }
        }
    }
}

/// Source of incoming connections.
#[async_trait]
trait Acceptor: Send {
    async fn accept_stream(&mut self) -> std::io::Result<UnixStream>;
}

#[async_trait]
impl Acceptor for UnixListener {
    async fn accept_stream(&mut self) -> std::io::Result<UnixStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

async fn serve_connection(stream: UnixStream, dispatcher: Arc<Dispatcher>) -> PilotResult<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for line in decoder.feed_raw(&buf[..n]) {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "dropping oversized request");
                    write_response(&mut writer, &e.into()).await?;
                    continue;
                }
            };
            let request = match line_decode::<Request>(&line) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "rejecting malformed request");
                    write_response(&mut writer, &Response::error("invalid JSON")).await?;
                    continue;
                }
            };

            if request.command().ok() == Some(Command::Subscribe) {
                tokio::select! {
                    result = dispatcher.subscribe(&request, &mut writer) => {
                        if let Err(e) = result {
                            debug!(error = %e, "subscriber dropped");
                        }
                    }
                    _ = wait_closed(&mut reader) => debug!("subscriber disconnected"),
                }
                return Ok(());
            }

            let response = dispatcher.dispatch(&request).await;
            write_response(&mut writer, &response).await?;
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> PilotResult<()> {
    let line = line_encode(response)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Resolve once the peer closes its end; anything it sends is ignored.
async fn wait_closed<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut sink = [0u8; 256];
    loop {
        match reader.read(&mut sink).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
