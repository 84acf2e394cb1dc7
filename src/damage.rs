//! Scroll cursor and damage tracking
//!
//! Each input line moves the baseline down by one line height. When the next
//! line would no longer fit, the cursor jumps back to the top margin and the
//! whole surface is damaged so the previous page is repainted away.

use crate::shm::Slot;

/// Damage rectangle in buffer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Layout constants for the scrolling text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollMetrics {
    pub line_height: i32,
    pub top_margin: i32,
}

impl Default for ScrollMetrics {
    fn default() -> Self {
        Self {
            line_height: 16,
            top_margin: 20,
        }
    }
}

/// What the present loop needs to know about one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDamage {
    pub slot: Slot,
    /// Baseline for this frame's line
    pub cursor_y: i32,
    /// The fresh line plus one line of margin above it
    pub incremental: Rect,
    /// Set on the frame where the cursor wrapped
    pub full: Option<Rect>,
}

impl FrameDamage {
    pub fn full_repaint(&self) -> bool {
        self.full.is_some()
    }

    /// Rectangles to submit, in order
    pub fn rects(&self) -> impl Iterator<Item = Rect> + '_ {
        std::iter::once(self.incremental).chain(self.full)
    }
}

/// Cursor position plus the slot to draw the next frame into
#[derive(Debug, Clone)]
pub struct ScrollState {
    metrics: ScrollMetrics,
    width: i32,
    height: i32,
    cursor_y: i32,
    active: Slot,
    /// Next frame damages the whole surface (fresh buffers after a resize)
    repaint: bool,
}

impl ScrollState {
    pub fn new(width: u32, height: u32, metrics: ScrollMetrics) -> Self {
        Self {
            metrics,
            width: width as i32,
            height: height as i32,
            cursor_y: metrics.top_margin,
            active: Slot::First,
            repaint: false,
        }
    }

    pub fn cursor_y(&self) -> i32 {
        self.cursor_y
    }

    pub fn active_slot(&self) -> Slot {
        self.active
    }

    /// Move the cursor to the next line and work out the frame's damage.
    pub fn advance(&mut self) -> FrameDamage {
        let line = self.metrics.line_height;
        self.cursor_y += line;

        if self.cursor_y >= self.height - line {
            self.cursor_y = self.metrics.top_margin;
            self.repaint = true;
        }
        let full = std::mem::take(&mut self.repaint)
            .then(|| Rect::new(0, 0, self.width, self.height));

        FrameDamage {
            slot: self.active,
            cursor_y: self.cursor_y,
            incremental: Rect::new(0, self.cursor_y - line, self.width, 2 * line),
            full,
        }
    }

    /// Flip to the other slot once a frame has been committed
    pub fn swap(&mut self) {
        self.active = self.active.other();
    }

    /// Adopt new surface dimensions; a cursor that no longer fits wraps.
    /// The next frame damages the whole surface.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width as i32;
        self.height = height as i32;
        self.repaint = true;
        if self.cursor_y >= self.height - self.metrics.line_height {
            self.cursor_y = self.metrics.top_margin;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScrollState {
        ScrollState::new(200, 200, ScrollMetrics::default())
    }

    #[test]
    fn test_cursor_sequence_and_wrap() {
        let mut scroll = state();
        let mut cursors = Vec::new();
        let mut wraps = Vec::new();
        for i in 0..20 {
            let frame = scroll.advance();
            cursors.push(frame.cursor_y);
            if frame.full_repaint() {
                wraps.push(i);
            }
        }

        // 36, 52, ..., 180 fit; the 11th step reaches 196 >= 184 and wraps
        assert_eq!(&cursors[..3], &[36, 52, 68]);
        assert_eq!(cursors[9], 180);
        assert_eq!(cursors[10], 20);
        assert_eq!(cursors[11], 36);
        assert_eq!(wraps, vec![10]);
    }

    #[test]
    fn test_incremental_damage_covers_two_lines() {
        let mut scroll = state();
        for _ in 0..30 {
            let frame = scroll.advance();
            let c = frame.cursor_y;
            assert_eq!(frame.incremental, Rect::new(0, c - 16, 200, 32));
        }
    }

    #[test]
    fn test_wrap_adds_full_surface_damage() {
        let mut scroll = ScrollState::new(120, 60, ScrollMetrics::default());
        // 20 -> 36 fits (36 < 44), 52 wraps
        let first = scroll.advance();
        assert_eq!(first.rects().count(), 1);

        let wrapped = scroll.advance();
        assert_eq!(wrapped.cursor_y, 20);
        let rects: Vec<Rect> = wrapped.rects().collect();
        assert_eq!(rects, vec![Rect::new(0, 4, 120, 32), Rect::new(0, 0, 120, 60)]);
    }

    #[test]
    fn test_slot_alternates_from_first() {
        let mut scroll = state();
        let mut slots = Vec::new();
        for _ in 0..5 {
            slots.push(scroll.advance().slot.index());
            scroll.swap();
        }
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_advance_without_swap_keeps_slot() {
        let mut scroll = state();
        assert_eq!(scroll.advance().slot, Slot::First);
        assert_eq!(scroll.advance().slot, Slot::First);
    }

    #[test]
    fn test_resize_wraps_cursor_that_no_longer_fits() {
        let mut scroll = state();
        for _ in 0..5 {
            scroll.advance();
        }
        assert_eq!(scroll.cursor_y(), 100);

        scroll.resize(200, 100);
        assert_eq!(scroll.cursor_y(), 20);

        let frame = scroll.advance();
        assert_eq!(frame.incremental.width, 200);
        assert_eq!(frame.cursor_y, 36);
        assert_eq!(frame.full, Some(Rect::new(0, 0, 200, 100)));
    }

    #[test]
    fn test_full_damage_only_once_after_resize() {
        let mut scroll = state();
        scroll.resize(300, 120);
        assert!(scroll.advance().full_repaint());
        assert!(!scroll.advance().full_repaint());
    }

    #[test]
    fn test_resize_keeps_cursor_that_fits() {
        let mut scroll = state();
        scroll.advance();
        scroll.resize(400, 400);
        assert_eq!(scroll.cursor_y(), 36);
        assert_eq!(scroll.advance().incremental, Rect::new(0, 36, 400, 32));
    }
}
