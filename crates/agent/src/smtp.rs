//! Minimal SMTP listener for journaled mail.
//!
//! Speaks just enough ESMTP for journaling MTAs: EHLO/HELO, AUTH (PLAIN and
//! LOGIN, any credentials accepted), MAIL FROM, RCPT TO, DATA with
//! dot-unstuffing, RSET, NOOP, QUIT. No relaying: every accepted message goes
//! to the handler, which must make it durable before we answer 250.

use crate::allowlist::IpAllowlist;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct SmtpEnvelope {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: Vec<u8>,
}

/// Outcome the handler reports for a completed DATA phase.
pub enum Disposition {
    /// Durably queued; reply 250.
    Queued(String),
    /// Transient failure; reply 451 so the MTA retries.
    TryAgain,
}

#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: SmtpEnvelope) -> Disposition;
}

pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn EnvelopeHandler>,
    allowlist: IpAllowlist,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(addr = ?listener.local_addr().ok(), "SMTP listener started");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if !allowlist.allows(peer.ip()) {
                    tracing::warn!(peer = %peer, "SMTP access denied");
                    tokio::spawn(reject_connection(stream));
                    continue;
                }
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_session(stream, peer, handler).await {
                        tracing::debug!(peer = %peer, error = %e, "SMTP session ended with error");
                    }
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("SMTP listener stopping");
                    return;
                }
            }
        }
    }
}

async fn reject_connection(mut stream: TcpStream) {
    let _ = stream.write_all(b"550 Access denied\r\n").await;
    let _ = stream.shutdown().await;
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn EnvelopeHandler>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_half.write_all(b"220 mailvault journaling agent\r\n").await?;

    let mut envelope = SmtpEnvelope::default();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("EHLO") {
            write_half
                .write_all(b"250-mailvault greets you\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n")
                .await?;
        } else if upper.starts_with("HELO") {
            write_half.write_all(b"250 mailvault greets you\r\n").await?;
        } else if upper.starts_with("AUTH LOGIN") {
            // Any credentials are accepted; the internal network is trusted
            // and writes to the core require the API key anyway.
            write_half.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
            line.clear();
            reader.read_line(&mut line).await?;
            write_half.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
            line.clear();
            reader.read_line(&mut line).await?;
            write_half.write_all(b"235 Authentication successful\r\n").await?;
        } else if upper.starts_with("AUTH") {
            write_half.write_all(b"235 Authentication successful\r\n").await?;
        } else if upper.starts_with("MAIL FROM:") {
            envelope.mail_from = parse_path(&trimmed["MAIL FROM:".len()..]);
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            envelope.rcpt_to.push(parse_path(&trimmed["RCPT TO:".len()..]));
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper == "DATA" {
            write_half.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;
            envelope.data = read_data(&mut reader).await?;
            tracing::info!(peer = %peer, from = %envelope.mail_from, size = envelope.data.len(), "message received");
            let reply = match handler.handle(std::mem::take(&mut envelope)).await {
                Disposition::Queued(id) => format!("250 OK queued as {id}\r\n"),
                Disposition::TryAgain => "451 Internal error, try again\r\n".to_string(),
            };
            write_half.write_all(reply.as_bytes()).await?;
        } else if upper == "RSET" {
            envelope = SmtpEnvelope::default();
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper == "NOOP" {
            write_half.write_all(b"250 OK\r\n").await?;
        } else if upper == "QUIT" {
            write_half.write_all(b"221 Bye\r\n").await?;
            return Ok(());
        } else {
            write_half.write_all(b"500 Command not recognized\r\n").await?;
        }
    }
}

/// Extract the path from `<alice@acme.com> [params]`.
fn parse_path(raw: &str) -> String {
    let raw = raw.trim();
    match (raw.find('<'), raw.find('>')) {
        (Some(start), Some(end)) if start < end => raw[start + 1..end].to_string(),
        _ => raw.split_whitespace().next().unwrap_or_default().to_string(),
    }
}

/// Read the DATA body until the lone-dot terminator, undoing dot-stuffing.
async fn read_data<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(data);
        }
        let stripped: &[u8] = if line.ends_with(b"\r\n") {
            &line[..line.len() - 2]
        } else if line.ends_with(b"\n") {
            &line[..line.len() - 1]
        } else {
            &line[..]
        };
        if stripped == b"." {
            return Ok(data);
        }
        if stripped.starts_with(b".") {
            data.extend_from_slice(&stripped[1..]);
        } else {
            data.extend_from_slice(stripped);
        }
        data.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    struct Recorder {
        envelopes: Mutex<Vec<SmtpEnvelope>>,
    }

    #[async_trait]
    impl EnvelopeHandler for Recorder {
        async fn handle(&self, envelope: SmtpEnvelope) -> Disposition {
            self.envelopes.lock().unwrap().push(envelope);
            Disposition::Queued("test-id".into())
        }
    }

    async fn send_and_collect(script: &[&str]) -> (Vec<SmtpEnvelope>, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorder = Arc::new(Recorder { envelopes: Mutex::new(Vec::new()) });
        let handler: Arc<dyn EnvelopeHandler> = recorder.clone();
        let (_tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, handler, IpAllowlist::default(), rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        for line in script {
            client.write_all(line.as_bytes()).await.unwrap();
            client.write_all(b"\r\n").await.unwrap();
        }
        client.shutdown().await.unwrap();
        let mut replies = String::new();
        client.read_to_string(&mut replies).await.unwrap();
        server.abort();

        let envelopes = recorder.envelopes.lock().unwrap().clone();
        (envelopes, replies)
    }

    #[tokio::test]
    async fn full_session_delivers_envelope() {
        let (envelopes, replies) = send_and_collect(&[
            "EHLO journaling.mta",
            "AUTH PLAIN AGFkbWluAHNlY3JldA==",
            "MAIL FROM:<journal@mta.local>",
            "RCPT TO:<archive@mailvault.local>",
            "DATA",
            "From: alice@acme.com",
            "Subject: Hello",
            "",
            "ping",
            ".",
            "QUIT",
        ])
        .await;

        assert!(replies.contains("250 OK queued as test-id"));
        assert!(replies.contains("221 Bye"));
        assert_eq!(envelopes.len(), 1);
        let env = &envelopes[0];
        assert_eq!(env.mail_from, "journal@mta.local");
        assert_eq!(env.rcpt_to, vec!["archive@mailvault.local"]);
        let body = String::from_utf8(env.data.clone()).unwrap();
        assert!(body.contains("Subject: Hello"));
        assert!(body.contains("ping"));
    }

    #[tokio::test]
    async fn dot_stuffed_lines_are_unstuffed() {
        let (envelopes, _) = send_and_collect(&[
            "HELO x",
            "MAIL FROM:<a@b.c>",
            "RCPT TO:<d@e.f>",
            "DATA",
            "..leading dot",
            ".",
            "QUIT",
        ])
        .await;
        let body = String::from_utf8(envelopes[0].data.clone()).unwrap();
        assert!(body.starts_with(".leading dot"));
    }

    #[tokio::test]
    async fn auth_login_accepts_anything() {
        let (_, replies) = send_and_collect(&[
            "EHLO x",
            "AUTH LOGIN",
            "dXNlcg==",
            "cGFzcw==",
            "QUIT",
        ])
        .await;
        assert!(replies.contains("235 Authentication successful"));
    }

    #[tokio::test]
    async fn denied_peer_gets_550() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Arc<dyn EnvelopeHandler> =
            Arc::new(Recorder { envelopes: Mutex::new(Vec::new()) });
        let (_tx, rx) = watch::channel(false);
        // Allow-list that matches nothing reachable from localhost.
        let server = tokio::spawn(serve(listener, handler, IpAllowlist::parse("10.9.9.9"), rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert!(reply.contains("550"));
        server.abort();
    }
}
