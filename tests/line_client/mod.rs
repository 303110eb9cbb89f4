//! A line-oriented test client plus gateway setup helpers.

use mail_gateway::config::Timeouts;
use mail_gateway::{
    CredentialVault, GatewayContext, GatewayServer, LocalProtocol, MailService, MailboxProfile,
    UpstreamCredentials,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Plain credentials for a fake server on localhost.
pub fn local_cred(port: u16, username: &str, password: &str) -> UpstreamCredentials {
    UpstreamCredentials {
        host: "127.0.0.1".to_string(),
        port,
        use_tls: false,
        username: username.to_string(),
        password: password.to_string(),
        accept_invalid_certs: true,
        security: None,
    }
}

pub fn profile(name: &str) -> MailboxProfile {
    MailboxProfile {
        name: name.to_string(),
        pop3: None,
        imap: None,
        smtp: None,
    }
}

/// Start a gateway listener for `protocol` over `profiles`.
pub async fn start_gateway(
    protocol: LocalProtocol,
    profiles: Vec<MailboxProfile>,
) -> (GatewayServer, SocketAddr) {
    let timeouts = Timeouts {
        upstream_read_secs: 5,
        data_secs: 5,
        client_idle_secs: 30,
        shutdown_grace_secs: 2,
    };
    let ctx = Arc::new(GatewayContext::new(
        CredentialVault::new(profiles),
        timeouts,
        "gw.test",
    ));
    let mut server = GatewayServer::new(protocol, "127.0.0.1:0", ctx);
    let addr = server.start().await.unwrap();
    (server, addr)
}

pub struct LineClient {
    stream: BufReader<TcpStream>,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Next line without its CRLF.
    pub async fn line(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, self.stream.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(read > 0, "connection closed");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Lines up to and including the first one that does not
    /// continue a multi-line SMTP reply.
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line().await;
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    /// Raw bytes of a POP3 multi-line response, status line through
    /// the terminating ".\r\n".
    pub async fn multiline(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut raw = Vec::new();
            tokio::time::timeout(READ_TIMEOUT, self.stream.read_until(b'\n', &mut raw))
                .await
                .expect("timed out waiting for a multi-line response")
                .unwrap();
            assert!(!raw.is_empty(), "connection closed");
            let done = raw == b".\r\n";
            out.extend_from_slice(&raw);
            if done {
                return out;
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.stream.get_mut().write_all(data).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    /// Send `line` and return the single-line response.
    pub async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.line().await
    }

    /// Send `line` and return a whole SMTP reply.
    pub async fn command_reply(&mut self, line: &str) -> Vec<String> {
        self.send(line).await;
        self.reply().await
    }

    /// Wait until the gateway closes the connection.
    pub async fn expect_closed(&mut self) {
        let mut rest = Vec::new();
        tokio::time::timeout(READ_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .expect("connection was not closed")
            .unwrap();
        assert!(rest.is_empty(), "unexpected data: {:?}", String::from_utf8_lossy(&rest));
    }
}
