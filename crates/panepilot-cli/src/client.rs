//! Connection to the daemon's control socket.

use anyhow::{bail, Context, Result};
use panepilot_core::{line_decode, line_encode, LineDecoder, Request, Response};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

pub struct ControlClient {
    stream: UnixStream,
    decoder: LineDecoder,
    pending: VecDeque<Vec<u8>>,
}

impl ControlClient {
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).await.with_context(|| {
            format!(
                "cannot connect to {} (is panepilotd running?)",
                socket.display()
            )
        })?;
        debug!(socket = %socket.display(), "connected");
        Ok(Self {
            stream,
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
        })
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let line = line_encode(request)?;
        self.stream.write_all(&line).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Next line from the daemon, or `None` once it hangs up.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut buf = [0u8; 8192];
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line_decode(&line)?));
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            for line in self.decoder.feed_raw(&buf[..n]) {
                self.pending.push_back(line?);
            }
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        match self.next::<Response>().await? {
            Some(response) => Ok(response),
            None => bail!("daemon closed the connection"),
        }
    }
}
