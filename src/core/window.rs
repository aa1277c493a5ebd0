//! Visible-range computation for long lists.
//!
//! Only the slice of a list that intersects the viewport (plus an overscan
//! margin on each side) is handed to the renderer. Both entry points are pure
//! functions of their arguments; nothing is cached between calls except in
//! an explicit [`HeightIndex`].

use std::ops::Range;

/// Height strategy for list items.
#[derive(Clone, Copy)]
pub enum ItemHeight<'a> {
    Fixed(f64),
    Variable(&'a dyn Fn(usize) -> f64),
}

impl ItemHeight<'_> {
    pub fn height_of(&self, index: usize) -> f64 {
        match self {
            ItemHeight::Fixed(h) => sanitize(*h),
            ItemHeight::Variable(f) => sanitize(f(index)),
        }
    }
}

impl std::fmt::Debug for ItemHeight<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemHeight::Fixed(h) => write!(f, "Fixed({h})"),
            ItemHeight::Variable(_) => write!(f, "Variable(..)"),
        }
    }
}

fn sanitize(height: f64) -> f64 {
    if height.is_finite() && height > 0.0 {
        height
    } else {
        0.0
    }
}

/// Inclusive index range to render plus its pixel placement.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowRange {
    pub start_index: usize,
    pub end_index: usize,
    /// Distance from the top of the list to `start_index`.
    pub offset_pixels: f64,
    /// Height of the whole list.
    pub total_pixels: f64,
    empty: bool,
}

impl WindowRange {
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn len(&self) -> usize {
        if self.empty {
            0
        } else {
            self.end_index - self.start_index + 1
        }
    }

    pub fn indices(&self) -> Range<usize> {
        if self.empty {
            0..0
        } else {
            self.start_index..self.end_index + 1
        }
    }
}

/// Computes which items intersect the viewport.
///
/// Negative or non-finite scroll offsets are treated as zero. A scroll offset
/// past the end of the list pins the window to the last item.
pub fn compute_window(
    scroll_offset: f64,
    viewport_size: f64,
    item_count: usize,
    item_height: ItemHeight<'_>,
    overscan: usize,
) -> WindowRange {
    if item_count == 0 {
        return WindowRange::empty();
    }
    let scroll = if scroll_offset.is_finite() {
        scroll_offset.max(0.0)
    } else {
        0.0
    };
    let viewport = if viewport_size.is_finite() {
        viewport_size.max(0.0)
    } else {
        0.0
    };
    match item_height {
        ItemHeight::Fixed(h) => fixed_window(scroll, viewport, item_count, h, overscan),
        ItemHeight::Variable(_) => {
            variable_window(scroll, viewport, item_count, &item_height, overscan)
        }
    }
}

fn fixed_window(scroll: f64, viewport: f64, count: usize, height: f64, overscan: usize) -> WindowRange {
    let h = sanitize(height);
    if h == 0.0 {
        return WindowRange {
            start_index: 0,
            end_index: count - 1,
            offset_pixels: 0.0,
            total_pixels: 0.0,
            empty: false,
        };
    }
    let last = count - 1;
    let first_visible = ((scroll / h).floor() as usize).min(last);
    let start = first_visible.saturating_sub(overscan);
    let visible = (viewport / h).ceil() as usize;
    let end = start
        .saturating_add(visible)
        .saturating_add(overscan.saturating_mul(2))
        .min(last);
    WindowRange {
        start_index: start,
        end_index: end,
        offset_pixels: start as f64 * h,
        total_pixels: count as f64 * h,
        empty: false,
    }
}

fn variable_window(
    scroll: f64,
    viewport: f64,
    count: usize,
    heights: &ItemHeight<'_>,
    overscan: usize,
) -> WindowRange {
    let bottom = scroll + viewport;
    let mut first_visible = None;
    let mut last_visible = None;
    let mut running = 0.0;
    for index in 0..count {
        running += heights.height_of(index);
        if first_visible.is_none() && running > scroll {
            first_visible = Some(index);
        }
        if last_visible.is_none() && running > bottom {
            last_visible = Some(index);
        }
    }
    let total = running;
    let last = count - 1;
    let start = first_visible.unwrap_or(last).saturating_sub(overscan);
    let end = last_visible
        .unwrap_or(last)
        .saturating_add(overscan)
        .min(last)
        .max(start);
    let offset = (0..start).map(|i| heights.height_of(i)).sum();
    WindowRange {
        start_index: start,
        end_index: end,
        offset_pixels: offset,
        total_pixels: total,
        empty: false,
    }
}

/// Prefix sums over measured heights, for repeated window queries against
/// the same list.
#[derive(Debug, Clone, Default)]
pub struct HeightIndex {
    /// `offsets[i]` is the top of item `i`; the final entry is the total.
    offsets: Vec<f64>,
}

impl HeightIndex {
    pub fn from_heights(heights: impl IntoIterator<Item = f64>) -> Self {
        let mut offsets = vec![0.0];
        let mut running = 0.0;
        for h in heights {
            running += sanitize(h);
            offsets.push(running);
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_height(&self) -> f64 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    pub fn offset_of(&self, index: usize) -> f64 {
        self.offsets.get(index).copied().unwrap_or_else(|| self.total_height())
    }

    pub fn height_of(&self, index: usize) -> f64 {
        match (self.offsets.get(index), self.offsets.get(index + 1)) {
            (Some(top), Some(bottom)) => bottom - top,
            _ => 0.0,
        }
    }

    /// Same result as [`compute_window`] with variable heights, in
    /// O(log n) per query.
    pub fn window(&self, scroll_offset: f64, viewport_size: f64, overscan: usize) -> WindowRange {
        let count = self.len();
        if count == 0 {
            return WindowRange::empty();
        }
        let scroll = if scroll_offset.is_finite() { scroll_offset.max(0.0) } else { 0.0 };
        let viewport = if viewport_size.is_finite() { viewport_size.max(0.0) } else { 0.0 };
        let bottom = scroll + viewport;
        let last = count - 1;

        // First item whose bottom edge lies strictly below the given line.
        let first_below = |line: f64| self.offsets[1..].partition_point(|&end| end <= line);

        let start = first_below(scroll).min(last).saturating_sub(overscan);
        let end = first_below(bottom)
            .min(last)
            .saturating_add(overscan)
            .min(last)
            .max(start);
        WindowRange {
            start_index: start,
            end_index: end,
            offset_pixels: self.offsets[start],
            total_pixels: self.total_height(),
            empty: false,
        }
    }
}

/// What the renderer receives for each visible item.
#[derive(Debug)]
pub struct RenderSlot<'a, T> {
    pub index: usize,
    pub record: &'a T,
    pub pixel_offset: f64,
    pub height: f64,
}

/// Calls `render` once per item in `window`, top to bottom. Indices past the
/// end of `items` are skipped.
pub fn visit_window<'a, T, F>(window: &WindowRange, items: &'a [T], heights: ItemHeight<'_>, mut render: F)
where
    F: FnMut(RenderSlot<'a, T>),
{
    let mut pixel_offset = window.offset_pixels;
    for index in window.indices() {
        let Some(record) = items.get(index) else {
            break;
        };
        let height = heights.height_of(index);
        render(RenderSlot {
            index,
            record,
            pixel_offset,
            height,
        });
        pixel_offset += height;
    }
}
