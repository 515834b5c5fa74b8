//! beanstalkd client speaking the text protocol over TCP.
//!
//! Only the commands a consumer needs are implemented: `watch`, `ignore`,
//! `reserve`, `reserve-with-timeout`, `stats-job`, `delete`, `bury`, `quit`.
//! Every command is one `\r\n` terminated line; `RESERVED` and `OK` replies
//! are followed by a body of the announced length plus `\r\n`.
//!
//! # Implementation notes
//! - `reserve-with-timeout` takes whole seconds, so timeouts are rounded up
//! - `DEADLINE_SOON` is not a job; the client reserves again with what is
//!   left of the deadline
//! - `NOT_FOUND` maps to `BrokerError::NotFound`, other refusals to
//!   `CommandFailed`; only I/O errors, EOF and bad framing count as a lost
//!   connection

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::{Job, JobId, JobStats};
use crate::ports::{Broker, BrokerError, Connector};

/// Port beanstalkd listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 11300;

/// One reply line, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Watching(usize),
    Reserved { id: JobId, bytes: usize },
    TimedOut,
    DeadlineSoon,
    Deleted,
    Buried,
    /// `OK <bytes>`, data follows.
    Ok(usize),
    NotFound,
    /// Well-formed refusal: `NOT_IGNORED`, `OUT_OF_MEMORY`, `INTERNAL_ERROR`,
    /// `BAD_FORMAT`, `UNKNOWN_COMMAND`.
    Failure(String),
}

/// Parse one reply line (without the trailing `\r\n`).
pub fn parse_response(line: &str) -> Result<Response, BrokerError> {
    let mut parts = line.split(' ');
    let word = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let number = |i: usize| -> Result<u64, BrokerError> {
        args.get(i)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| BrokerError::Protocol(line.to_string()))
    };

    let response = match (word, args.len()) {
        ("WATCHING", 1) => Response::Watching(number(0)? as usize),
        ("RESERVED", 2) => Response::Reserved {
            id: JobId::new(number(0)?),
            bytes: number(1)? as usize,
        },
        ("TIMED_OUT", 0) => Response::TimedOut,
        ("DEADLINE_SOON", 0) => Response::DeadlineSoon,
        ("DELETED", 0) => Response::Deleted,
        ("BURIED", 0) => Response::Buried,
        ("OK", 1) => Response::Ok(number(0)? as usize),
        ("NOT_FOUND", 0) => Response::NotFound,
        ("NOT_IGNORED" | "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND", 0) => {
            Response::Failure(word.to_string())
        }
        _ => return Err(BrokerError::Protocol(line.to_string())),
    };
    Ok(response)
}

/// Opens TCP connections to a beanstalkd server.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeanstalkConnector;

#[async_trait]
impl Connector for BeanstalkConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Broker>, BrokerError> {
        debug!(host, port, "connecting to beanstalkd");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(BeanstalkConnection::new(stream)))
    }
}

/// A beanstalkd session over any byte stream.
pub struct BeanstalkConnection<S> {
    stream: BufStream<S>,
    closed: bool,
}

impl<S> BeanstalkConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            closed: false,
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        trace!(command, "sending");
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, BrokerError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            self.closed = true;
            return Err(BrokerError::Closed);
        }
        if !buf.ends_with(b"\r\n") {
            return Err(BrokerError::Protocol(String::from_utf8_lossy(&buf).into_owned()));
        }
        buf.truncate(buf.len() - 2);
        let line = String::from_utf8(buf)
            .map_err(|e| BrokerError::Protocol(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        trace!(response = %line, "received");
        Ok(line)
    }

    async fn read_body(&mut self, bytes: usize) -> Result<Vec<u8>, BrokerError> {
        let mut buf = vec![0u8; bytes + 2];
        self.stream.read_exact(&mut buf).await?;
        if !buf.ends_with(b"\r\n") {
            return Err(BrokerError::Protocol("job body not terminated by CRLF".to_string()));
        }
        buf.truncate(bytes);
        Ok(buf)
    }

    async fn command(&mut self, command: &str) -> Result<Response, BrokerError> {
        self.send(command).await?;
        let line = self.read_line().await?;
        parse_response(&line)
    }

    async fn tube_command(&mut self, command: String) -> Result<usize, BrokerError> {
        match self.command(&command).await? {
            Response::Watching(count) => Ok(count),
            other => Err(unexpected(command, other)),
        }
    }
}

fn unexpected(command: String, response: Response) -> BrokerError {
    match response {
        Response::NotFound => BrokerError::NotFound,
        Response::Failure(response) => BrokerError::CommandFailed { command, response },
        other => BrokerError::Protocol(format!("{other:?} in reply to {command}")),
    }
}

/// Seconds for `reserve-with-timeout`, rounded up.
fn whole_seconds(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
}

#[async_trait]
impl<S> Broker for BeanstalkConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn watch(&mut self, tube: &str) -> Result<usize, BrokerError> {
        self.tube_command(format!("watch {tube}")).await
    }

    async fn ignore(&mut self, tube: &str) -> Result<usize, BrokerError> {
        self.tube_command(format!("ignore {tube}")).await
    }

    async fn reserve(&mut self, timeout: Option<Duration>) -> Result<Option<Job>, BrokerError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let command = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    format!("reserve-with-timeout {}", whole_seconds(remaining))
                }
                None => "reserve".to_string(),
            };
            match self.command(&command).await? {
                Response::Reserved { id, bytes } => {
                    let body = self.read_body(bytes).await?;
                    return Ok(Some(Job::new(id, body)));
                }
                Response::TimedOut => return Ok(None),
                // A job this connection holds is about to expire; nothing is held
                // while reserving, so ask again.
                Response::DeadlineSoon => {
                    debug!("deadline soon, reserving again");
                    continue;
                }
                other => return Err(unexpected(command, other)),
            }
        }
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats, BrokerError> {
        let command = format!("stats-job {}", id.get());
        match self.command(&command).await? {
            Response::Ok(bytes) => {
                let body = self.read_body(bytes).await?;
                serde_yaml::from_slice(&body)
                    .map_err(|e| BrokerError::Protocol(format!("unreadable stats for {id}: {e}")))
            }
            other => Err(unexpected(command, other)),
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<(), BrokerError> {
        let command = format!("delete {}", id.get());
        match self.command(&command).await? {
            Response::Deleted => Ok(()),
            other => Err(unexpected(command, other)),
        }
    }

    async fn bury(&mut self, id: JobId, priority: u32) -> Result<(), BrokerError> {
        let command = format!("bury {} {priority}", id.get());
        match self.command(&command).await? {
            Response::Buried => Ok(()),
            other => Err(unexpected(command, other)),
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        let sent = self.send("quit").await;
        self.closed = true;
        let shutdown = self.stream.shutdown().await;
        sent?;
        shutdown?;
        Ok(())
    }
}
