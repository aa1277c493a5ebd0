//! Single owner of all mutable list state.
//!
//! Renderers read borrowed slices and a [`WindowRange`] from here and never
//! mutate anything directly. Every input (snapshot, query edit, scroll,
//! timer tick) goes through a method on [`Dashboard`].

use super::diff::{RecordDiffTracker, Throughput};
use super::filter_sort::{self, FilterOptions, NetworkFilter, SortSpec, StatusFilter};
use super::record::{Document, EnrichedRecord, Rule, RuleEntry, RuleProvider, Snapshot};
use super::reveal::{BurstGeometry, RevealConfig, RevealScheduler, RevealState};
use super::window::{compute_window, visit_window, ItemHeight, RenderSlot, WindowRange};
use crate::config::ViewConfig;
use crate::filter::{parse_query_with, SearchClause};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;
use tracing::debug;

/// Scroll and reveal state of one list.
#[derive(Debug, Clone)]
pub struct ListView {
    scheduler: RevealScheduler,
    scroll_offset: f64,
    viewport_height: f64,
    item_height: f64,
    overscan: usize,
}

impl ListView {
    pub fn new(config: RevealConfig, item_height: f64, overscan: usize) -> Self {
        Self {
            scheduler: RevealScheduler::new(config),
            scroll_offset: 0.0,
            viewport_height: 0.0,
            item_height,
            overscan,
        }
    }

    fn geometry(&self) -> BurstGeometry {
        BurstGeometry {
            viewport_height: self.viewport_height,
            average_item_height: self.item_height,
        }
    }

    fn sync(&mut self, identity: u64, total: usize, now: Instant) {
        if self.scheduler.sync(identity, total, self.geometry(), now) {
            self.scroll_offset = 0.0;
        }
        self.clamp_scroll();
    }

    fn content_height(&self) -> f64 {
        self.scheduler.revealed() as f64 * self.item_height
    }

    fn clamp_scroll(&mut self) {
        let max = (self.content_height() - self.viewport_height).max(0.0);
        self.scroll_offset = self.scroll_offset.clamp(0.0, max);
    }

    /// A taller viewport may uncover rows past the revealed prefix, so it is
    /// fed to the scheduler like a scroll until the viewport is filled.
    pub fn set_viewport_height(&mut self, height: f64, now: Instant) {
        let grew = height > self.viewport_height;
        self.viewport_height = height.max(0.0);
        self.clamp_scroll();
        if !grew {
            return;
        }
        loop {
            let before = self.scheduler.revealed();
            self.scheduler.on_scroll(
                self.scroll_offset,
                self.viewport_height,
                self.content_height(),
                now,
            );
            if self.scheduler.revealed() == before || self.content_height() >= self.viewport_height {
                break;
            }
        }
    }

    pub fn scroll_to(&mut self, offset: f64, now: Instant) {
        self.scroll_offset = offset;
        self.clamp_scroll();
        self.scheduler.on_scroll(
            self.scroll_offset,
            self.viewport_height,
            self.content_height(),
            now,
        );
    }

    pub fn scroll_by(&mut self, delta: f64, now: Instant) {
        self.scroll_to(self.scroll_offset + delta, now);
    }

    pub fn scroll_to_end(&mut self, now: Instant) {
        self.scheduler.load_more(now);
        self.scroll_to(f64::MAX, now);
    }

    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn load_more(&mut self, now: Instant) {
        self.scheduler.load_more(now);
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.scheduler.tick(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn reveal_state(&self) -> RevealState {
        self.scheduler.state()
    }

    /// Visible range within the revealed prefix.
    pub fn window(&self) -> WindowRange {
        compute_window(
            self.scroll_offset,
            self.viewport_height,
            self.scheduler.revealed(),
            ItemHeight::Fixed(self.item_height),
            self.overscan,
        )
    }

    /// Invokes `render` for each visible row of `items`.
    pub fn render<'a, T, F>(&self, items: &'a [T], render: F)
    where
        F: FnMut(RenderSlot<'a, T>),
    {
        let window = self.window();
        let revealed = &items[..self.scheduler.revealed().min(items.len())];
        visit_window(&window, revealed, ItemHeight::Fixed(self.item_height), render);
    }

    fn cancel(&mut self) {
        self.scheduler.cancel();
        self.scroll_offset = 0.0;
    }
}

fn identity_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

pub struct ConnectionsPane {
    tracker: RecordDiffTracker,
    options: FilterOptions,
    query: String,
    rows: Vec<EnrichedRecord>,
    view: ListView,
    source_epoch: u64,
}

impl ConnectionsPane {
    fn new(config: &ViewConfig, item_height: f64) -> Result<Self> {
        Ok(Self {
            tracker: RecordDiffTracker::new(config.closed_history_capacity)?,
            options: FilterOptions {
                case_insensitive: config.case_insensitive,
                ..FilterOptions::default()
            },
            query: String::new(),
            rows: Vec::new(),
            view: ListView::new(config.reveal_config(), item_height, config.overscan),
            source_epoch: 0,
        })
    }

    fn identity(&self) -> u64 {
        identity_of(&(self.source_epoch, &self.options))
    }

    fn refresh(&mut self, now: Instant) {
        self.rows = match self.options.status {
            StatusFilter::Active => filter_sort::apply(self.tracker.active(), &self.options),
            StatusFilter::Closed | StatusFilter::All => {
                let mut all = self.tracker.active().to_vec();
                all.extend(self.tracker.closed().iter().cloned());
                filter_sort::apply(&all, &self.options)
            }
        };
        self.view.sync(self.identity(), self.rows.len(), now);
    }

    pub fn rows(&self) -> &[EnrichedRecord] {
        &self.rows
    }

    pub fn view(&self) -> &ListView {
        &self.view
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn active_count(&self) -> usize {
        self.tracker.active().len()
    }

    pub fn closed_count(&self) -> usize {
        self.tracker.closed().len()
    }

    pub fn throughput(&self) -> Throughput {
        self.tracker.throughput()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.tracker.last_update()
    }
}

pub struct RulesPane {
    rules: Vec<Rule>,
    providers: Vec<RuleProvider>,
    query: String,
    clauses: Vec<SearchClause>,
    case_insensitive: bool,
    rows: Vec<RuleEntry>,
    view: ListView,
    source_epoch: u64,
}

impl RulesPane {
    fn new(config: &ViewConfig, item_height: f64) -> Self {
        Self {
            rules: Vec::new(),
            providers: Vec::new(),
            query: String::new(),
            clauses: Vec::new(),
            case_insensitive: config.case_insensitive,
            rows: Vec::new(),
            view: ListView::new(config.reveal_config(), item_height, config.overscan),
            source_epoch: 0,
        }
    }

    fn identity(&self) -> u64 {
        identity_of(&(self.source_epoch, &self.clauses, self.case_insensitive))
    }

    fn refresh(&mut self, now: Instant) {
        let entries: Vec<RuleEntry> = self
            .rules
            .iter()
            .cloned()
            .map(RuleEntry::Rule)
            .chain(self.providers.iter().cloned().map(RuleEntry::Provider))
            .collect();
        self.rows = filter_sort::filter_records(&entries, &self.clauses, self.case_insensitive);
        self.view.sync(self.identity(), self.rows.len(), now);
    }

    pub fn rows(&self) -> &[RuleEntry] {
        &self.rows
    }

    pub fn view(&self) -> &ListView {
        &self.view
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Connections,
    Rules,
}

impl Tab {
    pub fn toggle(self) -> Self {
        match self {
            Tab::Connections => Tab::Rules,
            Tab::Rules => Tab::Connections,
        }
    }
}

pub struct Dashboard {
    config: ViewConfig,
    tab: Tab,
    connections: ConnectionsPane,
    rules: RulesPane,
}

impl Dashboard {
    /// `item_height` is the fixed row height both lists are laid out with.
    pub fn new(config: ViewConfig, item_height: f64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connections: ConnectionsPane::new(&config, item_height)?,
            rules: RulesPane::new(&config, item_height),
            config,
            tab: Tab::Connections,
        })
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn toggle_tab(&mut self) {
        self.tab = self.tab.toggle();
    }

    pub fn connections(&self) -> &ConnectionsPane {
        &self.connections
    }

    pub fn rules(&self) -> &RulesPane {
        &self.rules
    }

    pub fn ingest(&mut self, document: Document, now: Instant, wall: DateTime<Utc>) {
        match document {
            Document::Connections(snapshot) => self.apply_snapshot(&snapshot, now, wall),
            Document::Rules(rules) => {
                debug!(count = rules.len(), "rules replaced");
                self.rules.rules = rules;
                self.rules.refresh(now);
            }
            Document::Providers(providers) => {
                debug!(count = providers.len(), "rule providers replaced");
                self.rules.providers = providers;
                self.rules.refresh(now);
            }
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, now: Instant, wall: DateTime<Utc>) {
        self.connections.tracker.apply(snapshot, wall);
        self.connections.refresh(now);
    }

    /// Forgets all data, e.g. when the feed switches to another daemon.
    pub fn reset_source(&mut self) {
        let c = &mut self.connections;
        c.tracker.reset();
        c.rows.clear();
        c.source_epoch += 1;
        c.view.cancel();

        let r = &mut self.rules;
        r.rules.clear();
        r.providers.clear();
        r.rows.clear();
        r.source_epoch += 1;
        r.view.cancel();
    }

    /// Sets the search text of the current tab.
    pub fn set_query(&mut self, text: &str, now: Instant) {
        let clauses = parse_query_with(text, self.config.enable_advanced_syntax);
        match self.tab {
            Tab::Connections => {
                self.connections.query = text.to_string();
                self.connections.options.clauses = clauses;
                self.connections.refresh(now);
            }
            Tab::Rules => {
                self.rules.query = text.to_string();
                self.rules.clauses = clauses;
                self.rules.refresh(now);
            }
        }
    }

    pub fn set_network(&mut self, network: NetworkFilter, now: Instant) {
        self.connections.options.network = network;
        self.connections.refresh(now);
    }

    pub fn set_status(&mut self, status: StatusFilter, now: Instant) {
        self.connections.options.status = status;
        self.connections.refresh(now);
    }

    pub fn set_sort(&mut self, sort: SortSpec, now: Instant) {
        self.connections.options.sort = sort;
        self.connections.refresh(now);
    }

    fn current_view_mut(&mut self) -> &mut ListView {
        match self.tab {
            Tab::Connections => &mut self.connections.view,
            Tab::Rules => &mut self.rules.view,
        }
    }

    pub fn current_view(&self) -> &ListView {
        match self.tab {
            Tab::Connections => &self.connections.view,
            Tab::Rules => &self.rules.view,
        }
    }

    pub fn set_viewport_height(&mut self, height: f64, now: Instant) {
        self.connections.view.set_viewport_height(height, now);
        self.rules.view.set_viewport_height(height, now);
    }

    pub fn scroll_by(&mut self, delta: f64, now: Instant) {
        self.current_view_mut().scroll_by(delta, now);
    }

    pub fn scroll_to_start(&mut self, now: Instant) {
        self.current_view_mut().scroll_to(0.0, now);
    }

    pub fn scroll_to_end(&mut self, now: Instant) {
        self.current_view_mut().scroll_to_end(now);
    }

    pub fn load_more(&mut self, now: Instant) {
        self.current_view_mut().load_more(now);
    }

    /// Drives pending reveal batches on both panes. Returns true if either
    /// revealed more rows.
    pub fn tick(&mut self, now: Instant) -> bool {
        let a = self.connections.view.tick(now);
        let b = self.rules.view.tick(now);
        a || b
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.connections.view.next_deadline(),
            self.rules.view.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
