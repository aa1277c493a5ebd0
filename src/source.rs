//! Feed readers. Every source runs on its own thread and reports through a
//! channel; each input line is one JSON document.

use crate::core::{decode_document, Document};
use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum FeedSource {
    File(PathBuf),
    Stdin,
    Network(u16),
}

impl FeedSource {
    pub fn describe(&self) -> String {
        match self {
            FeedSource::File(path) => path.display().to_string(),
            FeedSource::Stdin => "stdin".to_string(),
            FeedSource::Network(port) => format!("tcp :{}", port),
        }
    }
}

#[derive(Debug)]
pub enum SourceEvent {
    Document(Document),
    Error(String),
    Connected(String),
    Disconnected(String),
}

/// Decodes one feed line. Blank lines yield nothing.
pub fn decode_line(line: &str) -> Option<SourceEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match decode_document(line) {
        Ok(document) => SourceEvent::Document(document),
        Err(e) => {
            warn!(error = %e, irregularity = "malformed_document", "dropping feed line");
            SourceEvent::Error(format!("malformed document: {}", e))
        }
    })
}

/// Forwards a decoded line. Returns false once the receiver is gone.
fn forward(tx: &Sender<SourceEvent>, line: &str) -> bool {
    match decode_line(line) {
        Some(event) => tx.send(event).is_ok(),
        None => true,
    }
}

pub fn start_source(source: FeedSource, tx: Sender<SourceEvent>) -> Result<()> {
    info!(source = %source.describe(), "starting feed");
    match source {
        FeedSource::File(path) => start_file_source(path, tx),
        FeedSource::Stdin => start_stdin_source(tx),
        FeedSource::Network(port) => start_network_source(port, tx),
    }
}

fn start_file_source(path: PathBuf, tx: Sender<SourceEvent>) -> Result<()> {
    thread::spawn(move || {
        if let Err(e) = run_file_source(&path, &tx) {
            warn!(path = %path.display(), error = %e, "file feed stopped");
            let _ = tx.send(SourceEvent::Error(e.to_string()));
        }
    });
    Ok(())
}

fn read_new_lines(path: &PathBuf, pos: u64, tx: &Sender<SourceEvent>) -> Result<Option<u64>> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let len = file.metadata()?.len();
    // Truncated or replaced: start over from the top.
    let start = if len < pos { 0 } else { pos };
    file.seek(SeekFrom::Start(start))?;

    let mut reader = BufReader::new(&mut file);
    let mut line = String::new();
    let mut consumed = start;
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 || !line.ends_with('\n') {
            // A partial last line is re-read once the writer finishes it.
            break;
        }
        consumed += n as u64;
        if !forward(tx, &line) {
            return Ok(None);
        }
    }
    Ok(Some(consumed))
}

fn run_file_source(path: &PathBuf, tx: &Sender<SourceEvent>) -> Result<()> {
    let Some(mut pos) = read_new_lines(path, 0, tx)? else {
        return Ok(());
    };

    let (notify_tx, notify_rx): (Sender<notify::Result<Event>>, Receiver<notify::Result<Event>>) =
        mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = notify_tx.send(res);
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;

    loop {
        match notify_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(_)) | Err(mpsc::RecvTimeoutError::Timeout) => {
                match read_new_lines(path, pos, tx)? {
                    Some(next) => pos = next,
                    None => return Ok(()),
                }
            }
            Ok(Err(e)) => {
                let _ = tx.send(SourceEvent::Error(e.to_string()));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn start_stdin_source(tx: Sender<SourceEvent>) -> Result<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        let reader = BufReader::new(stdin.lock());
        for line in reader.lines() {
            match line {
                Ok(l) => {
                    if !forward(&tx, &l) {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(SourceEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        debug!("stdin feed ended");
    });
    Ok(())
}

fn start_network_source(port: u16, tx: Sender<SourceEvent>) -> Result<()> {
    let listener = TcpListener::bind(format!("[::]:{}", port))
        .or_else(|_| TcpListener::bind(format!("0.0.0.0:{}", port)))
        .with_context(|| format!("binding port {}", port))?;
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(s) => {
                    let tx_clone = tx.clone();
                    thread::spawn(move || handle_client(s, tx_clone));
                }
                Err(e) => {
                    let _ = tx.send(SourceEvent::Error(format!("Accept error: {}", e)));
                }
            }
        }
    });
    Ok(())
}

fn handle_client(stream: TcpStream, tx: Sender<SourceEvent>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(peer = %peer, "feed client connected");
    let _ = tx.send(SourceEvent::Connected(peer.clone()));

    let reader = BufReader::new(&stream);
    for line in reader.lines() {
        match line {
            Ok(l) => {
                if !forward(&tx, &l) {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(SourceEvent::Error(format!("Read error from {}: {}", peer, e)));
                break;
            }
        }
    }
    info!(peer = %peer, "feed client disconnected");
    let _ = tx.send(SourceEvent::Disconnected(peer));
}
