use firmae_protocol::Reply;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Reads newline-delimited messages as bytes and decodes them leniently, so a stray invalid
/// UTF-8 sequence only affects the line it appears in.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(read: R) -> Self {
        Self {
            inner: BufReader::new(read),
            buf: Vec::with_capacity(4096),
        }
    }

    /// The next line without its terminator, or `None` at end of input.
    pub(crate) async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

struct WriteRequest {
    bytes: Vec<u8>,
    reply: oneshot::Sender<io::Result<()>>,
}

async fn run_write_loop<W: AsyncWrite + Unpin>(mut write: W, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(req) = rx.recv().await {
        let result = async {
            write.write_all(&req.bytes).await?;
            write.flush().await?;
            Ok(())
        }
        .await;
        let should_stop = result.is_err();
        let _ = req.reply.send(result);
        if should_stop {
            break;
        }
    }
}

/// Handle to the single task that owns the output stream.
///
/// Every reply goes through the channel as one complete `<json>\n` buffer, so replies from the
/// read loop and from background tool calls never interleave.
#[derive(Clone)]
pub(crate) struct ReplySink {
    tx: mpsc::Sender<WriteRequest>,
}

impl ReplySink {
    pub(crate) fn spawn<W>(write: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<WriteRequest>(16);
        let task = tokio::spawn(run_write_loop(write, rx));
        (Self { tx }, task)
    }

    pub(crate) async fn send(&self, reply: &Reply) -> io::Result<()> {
        let bytes = reply.to_line().map_err(io::Error::other)?;
        let (reply_tx, reply_rx) = oneshot::channel::<io::Result<()>>();
        self.tx
            .send(WriteRequest {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "output closed"))?;
        reply_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "output closed"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn lines_are_split_and_decoded_leniently() {
        let (mut client, server) = tokio::io::duplex(1024);
        client
            .write_all(b"first\r\n\xffsecond\n\nlast-without-newline")
            .await
            .expect("write");
        drop(client);

        let mut reader = LineReader::new(server);
        assert_eq!(reader.next_line().await.expect("read").as_deref(), Some("first"));
        assert_eq!(
            reader.next_line().await.expect("read").as_deref(),
            Some("\u{FFFD}second")
        );
        assert_eq!(reader.next_line().await.expect("read").as_deref(), Some(""));
        assert_eq!(
            reader.next_line().await.expect("read").as_deref(),
            Some("last-without-newline")
        );
        assert_eq!(reader.next_line().await.expect("read"), None);
    }

    #[tokio::test]
    async fn concurrent_senders_produce_whole_lines() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (sink, task) = ReplySink::spawn(server);

        let mut handles = Vec::new();
        for id in 0..20 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let reply = Reply::result(json!(id), json!({ "payload": "x".repeat(512) }));
                sink.send(&reply).await.expect("send");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        drop(sink);
        task.await.expect("writer task");

        let mut out = String::new();
        let mut client = client;
        client.read_to_string(&mut out).await.expect("read");
        let mut ids: Vec<i64> = out
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).expect("whole json line");
                value["id"].as_i64().expect("id")
            })
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
    }
}
