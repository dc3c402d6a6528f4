//! RouterOS API client
//!
//! Binary API on TCP 8728. A sentence is a sequence of length-prefixed words
//! terminated by a zero-length word. Replies start with `!re` (one row),
//! `!done`, `!trap` (command error) or `!fatal` (session is gone).

use std::time::Duration;

use async_trait::async_trait;
use netbill_shared::NetworkDevice;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{DeviceConnector, DeviceSession, Params, Row};
use crate::error::{BillingError, BillingResult};

/// Upper bound on a single word; anything larger is a corrupt stream
const MAX_WORD_LEN: u32 = 16 * 1024 * 1024;

pub(crate) fn encode_length(len: u32) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![
            0xF0,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }
}

pub(crate) async fn decode_length<R>(reader: &mut R) -> std::io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let first = reader.read_u8().await? as u32;
    let (extra, mut len) = if first & 0x80 == 0 {
        (0, first)
    } else if first & 0xC0 == 0x80 {
        (1, first & 0x3F)
    } else if first & 0xE0 == 0xC0 {
        (2, first & 0x1F)
    } else if first & 0xF0 == 0xE0 {
        (3, first & 0x0F)
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("reserved length prefix 0x{:02X}", first),
        ));
    };

    for _ in 0..extra {
        len = (len << 8) | reader.read_u8().await? as u32;
    }
    Ok(len)
}

pub(crate) async fn write_sentence<W>(writer: &mut W, words: &[String]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    for word in words {
        let len = u32::try_from(word.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "word too long")
        })?;
        buf.extend(encode_length(len));
        buf.extend_from_slice(word.as_bytes());
    }
    buf.push(0);
    writer.write_all(&buf).await?;
    writer.flush().await
}

pub(crate) async fn read_sentence<R>(reader: &mut R) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut words = Vec::new();
    loop {
        let len = decode_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("word length {} exceeds limit", len),
            ));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

fn command_words(command: &str, params: &Params) -> Vec<String> {
    let mut words = Vec::with_capacity(params.len() + 1);
    words.push(command.to_string());
    for (key, value) in params {
        match key.strip_prefix('?') {
            Some(query) => words.push(format!("?{}={}", query, value)),
            None => words.push(format!("={}={}", key, value)),
        }
    }
    words
}

/// `=key=value` words into a row; `.tag` and other control words are dropped
fn parse_attributes(words: &[String]) -> Row {
    words
        .iter()
        .filter_map(|word| word.strip_prefix('='))
        .filter_map(|attr| attr.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// One authenticated API session
pub struct RouterOsSession<S> {
    stream: S,
    host: String,
    timeout: Duration,
    closed: bool,
}

impl<S> RouterOsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            stream,
            host: host.into(),
            timeout,
            closed: false,
        }
    }

    /// Post-6.43 plain login
    pub async fn login(&mut self, username: &str, password: &str) -> BillingResult<()> {
        let mut params = Params::new();
        params.insert("name".to_string(), username.to_string());
        params.insert("password".to_string(), password.to_string());

        match self.write("/login", &params).await {
            Ok(_) => Ok(()),
            Err(BillingError::DeviceCommand(msg)) => Err(BillingError::DeviceAuth(format!(
                "{}: {}",
                self.host, msg
            ))),
            Err(e) => Err(e),
        }
    }

    async fn exchange(&mut self, command: &str, params: &Params) -> BillingResult<Vec<Row>> {
        write_sentence(&mut self.stream, &command_words(command, params)).await?;

        let mut rows = Vec::new();
        let mut trap: Option<String> = None;
        loop {
            let sentence = read_sentence(&mut self.stream).await?;
            let Some((reply, rest)) = sentence.split_first() else {
                continue;
            };

            match reply.as_str() {
                "!re" => rows.push(parse_attributes(rest)),
                "!done" => break,
                "!empty" => {}
                "!trap" => {
                    let attrs = parse_attributes(rest);
                    trap = Some(
                        attrs
                            .get("message")
                            .cloned()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    );
                }
                "!fatal" => {
                    self.closed = true;
                    let reason = rest.first().cloned().unwrap_or_default();
                    return Err(BillingError::DeviceProtocol(format!(
                        "{} closed the session: {}",
                        self.host, reason
                    )));
                }
                other => {
                    return Err(BillingError::DeviceProtocol(format!(
                        "{} sent unexpected reply {}",
                        self.host, other
                    )));
                }
            }
        }

        match trap {
            Some(message) => Err(BillingError::DeviceCommand(format!(
                "{} on {}: {}",
                command, self.host, message
            ))),
            None => Ok(rows),
        }
    }
}

#[async_trait]
impl<S> DeviceSession for RouterOsSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, command: &str, params: &Params) -> BillingResult<Vec<Row>> {
        if self.closed {
            return Err(BillingError::DeviceProtocol(format!(
                "session to {} is closed",
                self.host
            )));
        }

        match tokio::time::timeout(self.timeout, self.exchange(command, params)).await {
            Ok(result) => result,
            Err(_) => {
                // A half-read reply leaves the stream unusable
                self.closed = true;
                Err(BillingError::DeviceTimeout(format!(
                    "{} on {} after {:?}",
                    command, self.host, self.timeout
                )))
            }
        }
    }

    async fn close(&mut self) -> BillingResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = tokio::time::timeout(self.timeout, self.stream.shutdown()).await;
        Ok(())
    }
}

/// Opens TCP sessions to RouterOS devices
pub struct RouterOsConnector {
    timeout: Duration,
}

impl RouterOsConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DeviceConnector for RouterOsConnector {
    async fn connect(&self, device: &NetworkDevice) -> BillingResult<Box<dyn DeviceSession>> {
        if !device.has_credentials() {
            return Err(BillingError::Config(format!(
                "device {} has no API credentials",
                device.name
            )));
        }

        let addr = device.address();
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BillingError::DeviceTimeout(format!("connect to {}", addr)))?
            .map_err(|e| BillingError::DeviceUnreachable(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let mut session = RouterOsSession::new(stream, device.name.clone(), self.timeout);
        session.login(&device.username, &device.password).await?;

        tracing::debug!(device = %device.name, addr = %addr, "RouterOS session opened");
        Ok(Box::new(session))
    }
}
