pub const DEFAULT_CLOSED_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_OVERSCAN: usize = 5;

pub const DEFAULT_INITIAL_BURST_BUFFER_RATIO: f64 = 0.5;
pub const INITIAL_BURST_FIRST_FRACTION: f64 = 0.4;
pub const INITIAL_BURST_STEP: usize = 15;
pub const INITIAL_BURST_INTERVAL_MS: u64 = 16;

pub const DEFAULT_STREAMING_BATCH_SIZE: usize = 30;
pub const STREAMING_DEBOUNCE_MS: u64 = 16;
pub const DEFAULT_SCROLL_LOAD_THRESHOLD: f64 = 0.6;
pub const DEFAULT_SCROLL_FORCE_THRESHOLD: f64 = 0.9;

pub const GENERAL_FIELD: &str = "_general";

pub const POLL_INTERVAL_MS: u64 = 50;

pub const ROW_HEIGHT: f64 = 1.0;
pub const INPUT_FIELD_HEIGHT: u16 = 3;
pub const TABLE_HEADER_HEIGHT: u16 = 1;
pub const STATUS_BAR_HEIGHT: u16 = 1;

pub const HELP_POPUP_WIDTH: u16 = 52;
pub const HELP_POPUP_HEIGHT: u16 = 6;
