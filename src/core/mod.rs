pub mod controller;
pub mod diff;
pub mod filter_sort;
pub mod format;
pub mod record;
pub mod reveal;
pub mod window;

pub use controller::{ConnectionsPane, Dashboard, ListView, RulesPane, Tab};
pub use diff::{diff_snapshot, ClosedHistory, DiffOutcome, RecordDiffTracker, Throughput};
pub use filter_sort::{FilterOptions, NetworkFilter, SortKey, SortOrder, SortSpec, StatusFilter};
pub use format::{format_bytes, format_connection_age, format_speed};
pub use record::{
    decode_document, Connection, Document, EnrichedRecord, Metadata, Network, Rule, RuleEntry,
    RuleProvider, Snapshot, StartTime,
};
pub use reveal::{BurstGeometry, RevealConfig, RevealPhase, RevealScheduler, RevealState};
pub use window::{compute_window, visit_window, HeightIndex, ItemHeight, RenderSlot, WindowRange};
