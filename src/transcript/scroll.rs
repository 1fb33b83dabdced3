//! Viewport tracking and auto-scroll coalescing.
//!
//! The browser reports its scroll metrics; the transcript decides whether an
//! append should force a scroll-to-bottom. Scroll execution is coalesced to
//! at most once per animation-frame interval so rapid token arrival does not
//! thrash layout.

use std::time::Duration;

use tokio::time::Instant;

/// Pixel tolerance when deciding whether the viewport is at the bottom.
pub const BOTTOM_TOLERANCE_PX: u32 = 10;

/// Minimum interval between executed scroll requests (one animation frame).
pub const SCROLL_FRAME: Duration = Duration::from_millis(16);

/// Client-reported viewport state plus pending scroll requests.
#[derive(Debug)]
pub struct Viewport {
    scroll_top: u32,
    scroll_height: u32,
    client_height: u32,
    at_bottom: bool,
    pending: bool,
    last_emit: Option<Instant>,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new()
    }
}

impl Viewport {
    /// New viewport; an empty transcript starts scrolled to the bottom.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scroll_top: 0,
            scroll_height: 0,
            client_height: 0,
            at_bottom: true,
            pending: false,
            last_emit: None,
        }
    }

    /// Record a manual scroll reported by the client.
    pub fn record_scroll(&mut self, scroll_top: u32, scroll_height: u32, client_height: u32) {
        self.scroll_top = scroll_top;
        self.scroll_height = scroll_height;
        self.client_height = client_height;
        self.at_bottom =
            scroll_height.saturating_sub(scroll_top) <= client_height + BOTTOM_TOLERANCE_PX;
    }

    /// Whether the viewport was at the bottom at the last report.
    #[must_use]
    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    /// Ask for a scroll-to-bottom on the next render.
    pub fn request_scroll(&mut self) {
        self.pending = true;
    }

    /// Consume a pending scroll request, rate-limited to one per frame.
    ///
    /// Returns `true` when the render should carry a scroll instruction.
    /// A request arriving inside the frame window stays pending and is
    /// picked up by a later render.
    pub fn take_scroll_request(&mut self) -> bool {
        if !self.pending {
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < SCROLL_FRAME {
                return false;
            }
        }
        self.pending = false;
        self.last_emit = Some(now);
        true
    }

    /// Drop any pending request and frame state.
    pub fn reset(&mut self) {
        self.pending = false;
        self.last_emit = None;
        self.at_bottom = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_bottom_tolerance() {
        let mut vp = Viewport::new();
        assert!(vp.is_at_bottom());

        // 1000px of content, 400px window, scrolled to 595: 5px from bottom.
        vp.record_scroll(595, 1000, 400);
        assert!(vp.is_at_bottom());

        // 20px from the bottom is outside the tolerance.
        vp.record_scroll(580, 1000, 400);
        assert!(!vp.is_at_bottom());

        vp.record_scroll(600, 1000, 400);
        assert!(vp.is_at_bottom());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_requests_coalesce_per_frame() {
        let mut vp = Viewport::new();

        vp.request_scroll();
        assert!(vp.take_scroll_request());

        // A second request inside the same frame stays pending.
        vp.request_scroll();
        assert!(!vp.take_scroll_request());

        tokio::time::advance(SCROLL_FRAME).await;
        assert!(vp.take_scroll_request());

        // Nothing pending, nothing emitted.
        assert!(!vp.take_scroll_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_pending() {
        let mut vp = Viewport::new();
        vp.record_scroll(0, 1000, 400);
        vp.request_scroll();
        vp.reset();
        assert!(!vp.take_scroll_request());
        assert!(vp.is_at_bottom());
    }
}
