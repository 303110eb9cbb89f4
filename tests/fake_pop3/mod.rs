//! Fake POP3 server for the gateway's relay backend
//!
//! Plain TCP only. Supports USER/PASS, STAT, LIST, UIDL, RETR, DELE,
//! RSET, NOOP and QUIT; DELE takes effect on QUIT.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Default)]
pub struct Maildrop {
    pub username: String,
    pub password: String,
    pub messages: Vec<Vec<u8>>,
    pub commands: Vec<String>,
}

impl Maildrop {
    pub fn new(username: &str, password: &str, messages: &[&[u8]]) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            messages: messages.iter().map(|m| m.to_vec()).collect(),
            commands: Vec::new(),
        }
    }
}

pub struct FakePop3Server {
    port: u16,
    maildrop: Arc<Mutex<Maildrop>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakePop3Server {
    pub async fn start(maildrop: Maildrop) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let maildrop = Arc::new(Mutex::new(maildrop));

        let shared = maildrop.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let maildrop = shared.clone();
                tokio::spawn(async move {
                    handle_connection(stream, &maildrop).await;
                });
            }
        });

        Self {
            port,
            maildrop,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn maildrop(&self) -> Maildrop {
        self.maildrop.lock().unwrap().clone()
    }
}

async fn write(stream: &mut BufReader<TcpStream>, data: &[u8]) -> std::io::Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await
}

fn multiline(status: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!("{status}\r\n").into_bytes();
    for line in body.split_inclusive(|&b| b == b'\n') {
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
    if !body.is_empty() && !body.ends_with(b"\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

fn is_live(maildrop: &Maildrop, deleted: &[usize], idx: usize) -> bool {
    idx < maildrop.messages.len() && !deleted.contains(&idx)
}

async fn handle_connection(stream: TcpStream, maildrop: &Mutex<Maildrop>) {
    let mut reader = BufReader::new(stream);
    if write(&mut reader, b"+OK fake POP3 ready\r\n").await.is_err() {
        return;
    }

    let mut user = None;
    let mut authenticated = false;
    let mut deleted: Vec<usize> = Vec::new();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end().to_string();
        maildrop.lock().unwrap().commands.push(line.clone());

        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_uppercase();
        let arg = words.next().map(str::to_string);
        let index = arg
            .as_deref()
            .and_then(|a| a.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1));

        let snap = maildrop.lock().unwrap().clone();

        let response: Vec<u8> = match verb.as_str() {
            "USER" => {
                user = arg;
                b"+OK\r\n".to_vec()
            }
            "PASS" => {
                authenticated = user.as_deref() == Some(snap.username.as_str())
                    && arg.as_deref() == Some(snap.password.as_str());
                if authenticated {
                    b"+OK Logged in\r\n".to_vec()
                } else {
                    b"-ERR Invalid credentials\r\n".to_vec()
                }
            }
            "QUIT" => {
                if authenticated {
                    let mut md = maildrop.lock().unwrap();
                    deleted.sort_unstable();
                    for idx in deleted.iter().rev() {
                        md.messages.remove(*idx);
                    }
                }
                let _ = write(&mut reader, b"+OK Bye\r\n").await;
                break;
            }
            _ if !authenticated => b"-ERR Not authenticated\r\n".to_vec(),
            "STAT" => {
                let live_msgs: Vec<_> = (0..snap.messages.len())
                    .filter(|i| is_live(&snap, &deleted, *i))
                    .collect();
                let total: usize = live_msgs.iter().map(|i| snap.messages[*i].len()).sum();
                format!("+OK {} {total}\r\n", live_msgs.len()).into_bytes()
            }
            "LIST" => {
                let body: String = (0..snap.messages.len())
                    .filter(|i| is_live(&snap, &deleted, *i))
                    .map(|i| format!("{} {}\r\n", i + 1, snap.messages[i].len()))
                    .collect();
                multiline("+OK scan listing follows", body.as_bytes())
            }
            "UIDL" => {
                let body: String = (0..snap.messages.len())
                    .filter(|i| is_live(&snap, &deleted, *i))
                    .map(|i| format!("{} uid-{}\r\n", i + 1, i + 1))
                    .collect();
                multiline("+OK", body.as_bytes())
            }
            "RETR" => match index {
                Some(idx) if is_live(&snap, &deleted, idx) => {
                    multiline("+OK message follows", &snap.messages[idx])
                }
                _ => b"-ERR No such message\r\n".to_vec(),
            },
            "DELE" => match index {
                Some(idx) if is_live(&snap, &deleted, idx) => {
                    deleted.push(idx);
                    b"+OK Marked\r\n".to_vec()
                }
                _ => b"-ERR No such message\r\n".to_vec(),
            },
            "RSET" => {
                deleted.clear();
                b"+OK\r\n".to_vec()
            }
            "NOOP" => b"+OK\r\n".to_vec(),
            _ => b"-ERR Unknown command\r\n".to_vec(),
        };

        if write(&mut reader, &response).await.is_err() {
            break;
        }
    }
}
