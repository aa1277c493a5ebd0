use crate::input::SearchInput;
use chrono::Utc;
use connview::config::ViewConfig;
use connview::constants::ROW_HEIGHT;
use connview::core::{Dashboard, SortSpec, Tab};
use connview::source::SourceEvent;
use crossterm::event::{KeyCode, KeyModifiers};
use std::sync::mpsc::Receiver;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
}

pub struct App {
    pub dashboard: Dashboard,
    pub search: SearchInput,
    pub input_mode: InputMode,
    pub source_rx: Receiver<SourceEvent>,
    pub source_label: String,
    pub status_message: Option<String>,
    pub peer: Option<String>,
}

impl App {
    pub fn new(
        source_rx: Receiver<SourceEvent>,
        source_label: String,
        config: ViewConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            dashboard: Dashboard::new(config, ROW_HEIGHT)?,
            search: SearchInput::default(),
            input_mode: InputMode::Normal,
            source_rx,
            source_label,
            status_message: None,
            peer: None,
        })
    }

    /// Drains the feed. Returns true if anything changed.
    pub fn poll_source(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Ok(event) = self.source_rx.try_recv() {
            changed = true;
            match event {
                SourceEvent::Document(document) => {
                    self.dashboard.ingest(document, now, Utc::now());
                }
                SourceEvent::Error(e) => {
                    self.status_message = Some(format!("Source error: {}", e));
                }
                SourceEvent::Connected(peer) => {
                    // A different daemon: nothing from the previous one carries over.
                    if self.peer.as_deref() != Some(peer.as_str()) {
                        info!(peer = %peer, "switching feed source");
                        self.dashboard.reset_source();
                    }
                    self.status_message = Some(format!("Connected: {}", peer));
                    self.peer = Some(peer);
                }
                SourceEvent::Disconnected(peer) => {
                    warn!(peer = %peer, "feed disconnected");
                    self.status_message = Some(format!("Disconnected: {}", peer));
                }
            }
        }
        changed
    }

    pub fn begin_search(&mut self) {
        let query = match self.dashboard.tab() {
            Tab::Connections => self.dashboard.connections().query().to_string(),
            Tab::Rules => self.dashboard.rules().query().to_string(),
        };
        self.search.set_text(&query);
        self.input_mode = InputMode::Search;
    }

    /// Edits the search field. The query is applied on every keystroke.
    pub fn handle_search_key(&mut self, code: KeyCode, modifiers: KeyModifiers, now: Instant) {
        match code {
            KeyCode::Enter | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                return;
            }
            KeyCode::Char('w') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.search.delete_word()
            }
            KeyCode::Char('u') if modifiers.contains(KeyModifiers::CONTROL) => self.search.clear(),
            KeyCode::Char(c) => self.search.insert(c),
            KeyCode::Backspace => self.search.backspace(),
            KeyCode::Delete => self.search.delete(),
            KeyCode::Left => self.search.left(),
            KeyCode::Right => self.search.right(),
            KeyCode::Home => self.search.home(),
            KeyCode::End => self.search.end(),
            _ => return,
        }
        self.dashboard.set_query(self.search.text(), now);
    }

    pub fn toggle_tab(&mut self) {
        self.dashboard.toggle_tab();
    }

    pub fn cycle_network(&mut self, now: Instant) {
        let next = self.dashboard.connections().options().network.cycle();
        self.dashboard.set_network(next, now);
    }

    pub fn cycle_status(&mut self, now: Instant) {
        let next = self.dashboard.connections().options().status.cycle();
        self.dashboard.set_status(next, now);
    }

    pub fn cycle_sort_key(&mut self, now: Instant) {
        let sort = self.dashboard.connections().options().sort;
        self.dashboard.set_sort(
            SortSpec {
                key: sort.key.next(),
                ..sort
            },
            now,
        );
    }

    pub fn flip_sort_order(&mut self, now: Instant) {
        let sort = self.dashboard.connections().options().sort;
        self.dashboard.set_sort(
            SortSpec {
                order: sort.order.flip(),
                ..sort
            },
            now,
        );
    }

    pub fn clear_query(&mut self, now: Instant) {
        self.search.clear();
        self.dashboard.set_query("", now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connview::core::{decode_document, SortKey, StatusFilter};
    use std::sync::mpsc;

    fn app() -> (App, mpsc::Sender<SourceEvent>) {
        let (tx, rx) = mpsc::channel();
        let mut app = App::new(rx, "test".to_string(), ViewConfig::default()).unwrap();
        app.dashboard.set_viewport_height(20.0, Instant::now());
        (app, tx)
    }

    fn snapshot(hosts: &[&str]) -> SourceEvent {
        let connections: Vec<String> = hosts
            .iter()
            .map(|h| {
                format!(
                    r#"{{"id":"{h}","metadata":{{"network":"tcp","destinationIP":"1.1.1.1","host":"{h}"}},"upload":1,"download":1}}"#
                )
            })
            .collect();
        let text = format!(r#"{{"connections":[{}]}}"#, connections.join(","));
        SourceEvent::Document(decode_document(&text).unwrap())
    }

    #[test]
    fn test_poll_applies_documents() {
        let (mut app, tx) = app();
        tx.send(snapshot(&["a.com", "b.com"])).unwrap();
        assert!(app.poll_source(Instant::now()));
        assert_eq!(app.dashboard.connections().active_count(), 2);
        assert!(!app.poll_source(Instant::now()));
    }

    #[test]
    fn test_new_peer_resets_data() {
        let (mut app, tx) = app();
        tx.send(SourceEvent::Connected("10.0.0.1:1".to_string())).unwrap();
        tx.send(snapshot(&["a.com"])).unwrap();
        app.poll_source(Instant::now());
        assert_eq!(app.dashboard.connections().active_count(), 1);

        tx.send(SourceEvent::Connected("10.0.0.2:1".to_string())).unwrap();
        app.poll_source(Instant::now());
        assert_eq!(app.dashboard.connections().active_count(), 0);
    }

    #[test]
    fn test_search_applies_live() {
        let (mut app, tx) = app();
        tx.send(snapshot(&["alpha.com", "beta.com"])).unwrap();
        let now = Instant::now();
        app.poll_source(now);

        app.begin_search();
        for c in "beta".chars() {
            app.handle_search_key(KeyCode::Char(c), KeyModifiers::NONE, now);
        }
        assert_eq!(app.dashboard.connections().rows().len(), 1);
        app.handle_search_key(KeyCode::Enter, KeyModifiers::NONE, now);
        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.dashboard.connections().query(), "beta");
    }

    #[test]
    fn test_search_field_follows_tab() {
        let (mut app, _tx) = app();
        let now = Instant::now();
        app.begin_search();
        app.handle_search_key(KeyCode::Char('x'), KeyModifiers::NONE, now);
        app.handle_search_key(KeyCode::Esc, KeyModifiers::NONE, now);
        app.toggle_tab();
        app.begin_search();
        assert_eq!(app.search.text(), "");
        app.toggle_tab();
        app.begin_search();
        assert_eq!(app.search.text(), "x");
    }

    #[test]
    fn test_option_cycling() {
        let (mut app, _tx) = app();
        let now = Instant::now();
        app.cycle_status(now);
        assert_eq!(app.dashboard.connections().options().status, StatusFilter::Closed);
        app.cycle_sort_key(now);
        assert_eq!(app.dashboard.connections().options().sort.key, SortKey::Host);
    }
}
