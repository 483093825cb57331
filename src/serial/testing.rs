//! In-memory serial device for tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::error::TransportError;

use super::discovery::PortScanner;
use super::link::{SerialLink, SerialOpener};

#[derive(Clone, Copy)]
pub enum Open {
    Ok,
    Denied,
    Hang,
}

#[derive(Clone)]
pub enum Reply {
    Line(&'static str),
    Hang,
    Eof,
}

#[derive(Default)]
pub struct Wire {
    replies: StdMutex<VecDeque<Reply>>,
    written: StdMutex<Vec<String>>,
}

impl Wire {
    pub fn push(&self, replies: &[Reply]) {
        self.replies.lock().unwrap().extend(replies.iter().cloned());
    }

    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

pub struct FakeLink {
    port: String,
    wire: Arc<Wire>,
}

#[async_trait]
impl SerialLink for FakeLink {
    fn port(&self) -> &str {
        &self.port
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.wire.written.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let next = self.wire.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Line(s)) => Ok(s.to_string()),
            Some(Reply::Eof) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed")),
            Some(Reply::Hang) | None => std::future::pending().await,
        }
    }
}

pub struct FakeOpener {
    ports: StdMutex<HashMap<String, Open>>,
    opens: AtomicUsize,
    pub wire: Arc<Wire>,
}

impl FakeOpener {
    pub fn new(ports: &[(&str, Open)]) -> Arc<Self> {
        Arc::new(Self {
            ports: StdMutex::new(ports.iter().map(|(p, o)| (p.to_string(), *o)).collect()),
            opens: AtomicUsize::new(0),
            wire: Arc::new(Wire::default()),
        })
    }

    pub fn set(&self, port: &str, open: Open) {
        self.ports.lock().unwrap().insert(port.to_string(), open);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialOpener for FakeOpener {
    async fn open(&self, port: &str, _baud: u32) -> Result<Box<dyn SerialLink>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.ports.lock().unwrap().get(port).copied();
        match behaviour {
            Some(Open::Ok) => Ok(Box::new(FakeLink { port: port.to_string(), wire: self.wire.clone() })),
            Some(Open::Denied) => Err(TransportError::PermissionDenied { port: port.to_string() }),
            Some(Open::Hang) => std::future::pending().await,
            None => Err(TransportError::DeviceNotFound { tried: port.to_string() }),
        }
    }
}

pub struct FakeScanner(pub Vec<&'static str>);

impl PortScanner for FakeScanner {
    fn scan(&self, _patterns: &[String]) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}
