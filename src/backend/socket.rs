//! Interactive Blender backend reached over a local TCP socket.
//!
//! One connection per call: connect, send a single framed JSON command,
//! read the framed response, close. Frames are newline-delimited JSON
//! documents in both directions; the message boundary is the terminating
//! `\n`, never "first prefix that happens to parse".

use crate::model::ExecutionResult;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SocketBackend {
    host: String,
    port: u16,
}

impl SocketBackend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Send one `{type, params}` command and return the addon's response.
    ///
    /// Transport failures (unreachable, refused, truncated stream) are
    /// folded into an error `ExecutionResult` carrying the OS error text,
    /// so connection-refusal detection upstream can see it.
    pub async fn send_command(&self, kind: &str, params: Value) -> ExecutionResult {
        match self.send_command_inner(kind, params).await {
            Ok(res) => res,
            Err(e) => {
                debug!(command = kind, error = %e, "socket command failed");
                ExecutionResult::error(format!("{e:#}"))
            }
        }
    }

    async fn send_command_inner(&self, kind: &str, params: Value) -> anyhow::Result<ExecutionResult> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut frame = serde_json::to_vec(&json!({ "type": kind, "params": params }))?;
        frame.push(b'\n');
        write_half.write_all(&frame).await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            anyhow::bail!("connection closed before a response frame arrived");
        }

        let res: ExecutionResult = serde_json::from_slice(&line)?;
        Ok(res)
    }

    pub async fn execute_code(&self, code: &str) -> ExecutionResult {
        self.send_command("execute_code", json!({ "code": code }))
            .await
    }

    pub async fn get_scene_info(&self) -> ExecutionResult {
        self.send_command("get_scene_info", json!({})).await
    }

    pub async fn get_object_info(&self, name: &str) -> ExecutionResult {
        self.send_command("get_object_info", json!({ "name": name }))
            .await
    }

    /// Ask the addon to save a packed copy of the live scene to `filepath`.
    pub async fn save_scene_copy(&self, filepath: &str, pack: bool) -> ExecutionResult {
        self.send_command(
            "save_scene_copy",
            json!({ "filepath": filepath, "pack": pack }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_becomes_error_result() {
        // Port 1 is essentially never listening.
        let backend = SocketBackend::new("127.0.0.1", 1);
        let res = backend.get_scene_info().await;
        assert!(res.is_declared_error());
        assert!(res.message.is_some());
    }

    #[tokio::test]
    async fn command_round_trip_uses_newline_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                sock.read_exact(&mut byte).await.unwrap();
                if byte[0] == b'\n' {
                    break;
                }
                buf.push(byte[0]);
            }
            let req: Value = serde_json::from_slice(&buf).unwrap();
            assert_eq!(req["type"], "execute_code");
            sock.write_all(b"{\"status\":\"success\",\"result\":\"done\"}\n")
                .await
                .unwrap();
        });

        let backend = SocketBackend::new("127.0.0.1", addr.port());
        let res = backend.execute_code("print(1)").await;
        server.await.unwrap();

        assert_eq!(res.status, "success");
        assert_eq!(res.result, Value::String("done".into()));
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error_not_a_partial_parse() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut sink = vec![0u8; 4096];
            let _ = sock.read(&mut sink).await;
            // Close without sending the frame terminator.
            sock.write_all(b"{\"status\":\"success\"").await.unwrap();
        });

        let backend = SocketBackend::new("127.0.0.1", addr.port());
        let res = backend.execute_code("print(1)").await;
        server.await.unwrap();
        assert!(res.is_declared_error());
    }
}
