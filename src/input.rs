//! Pointer interaction forwarding.
//!
//! Local pointer events against the rendered stream surface are scaled into
//! the canonical viewport the remote browser renders at, then replayed as a
//! press/release pair over the stream channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::manager::ConnectionManager;
use crate::types::{InputCommand, MouseButton, MouseEventType};

/// Width of the canonical viewport the remote side renders at.
pub const CANONICAL_WIDTH: u32 = 1280;
/// Height of the canonical viewport the remote side renders at.
pub const CANONICAL_HEIGHT: u32 = 800;

/// Gap between the synthesized press and release of a click.
pub const DEFAULT_PRESS_RELEASE_GAP: Duration = Duration::from_millis(100);

/// A fixed reference resolution, independent of local layout scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: CANONICAL_WIDTH,
            height: CANONICAL_HEIGHT,
        }
    }
}

/// A pointer hit on the rendered stream surface, in local pixels, together
/// with the surface's rendered size.
#[derive(Debug, Clone, Copy)]
pub struct PointerHit {
    pub x: f64,
    pub y: f64,
    pub rendered_width: f64,
    pub rendered_height: f64,
}

/// Button and click-count for a synthesized click. Defaults model a left
/// single click.
#[derive(Debug, Clone, Copy)]
pub struct ClickParams {
    pub button: MouseButton,
    pub click_count: u32,
}

impl Default for ClickParams {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            click_count: 1,
        }
    }
}

/// Scale a local hit into canonical viewport coordinates:
/// `x = round(local_x * canonical_w / rendered_w)`, analogously for y.
pub fn map_to_canonical(hit: PointerHit, canonical: Viewport) -> (i64, i64) {
    let x = (hit.x * f64::from(canonical.width) / hit.rendered_width).round() as i64;
    let y = (hit.y * f64::from(canonical.height) / hit.rendered_height).round() as i64;
    (x, y)
}

/// Translates local pointer events into remote input-injection commands.
pub struct InteractionForwarder {
    manager: Arc<ConnectionManager>,
    canonical: Viewport,
    press_release_gap: Duration,
}

impl InteractionForwarder {
    /// Create a forwarder with the default canonical viewport and gap.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_config(manager, Viewport::default(), DEFAULT_PRESS_RELEASE_GAP)
    }

    /// Create a forwarder with explicit canonical viewport and press/release
    /// gap.
    pub fn with_config(
        manager: Arc<ConnectionManager>,
        canonical: Viewport,
        press_release_gap: Duration,
    ) -> Self {
        Self {
            manager,
            canonical,
            press_release_gap,
        }
    }

    /// Forward a left single click at the given hit.
    pub fn click(&self, hit: PointerHit) {
        self.click_with(hit, ClickParams::default());
    }

    /// Forward a click with explicit button and click-count. A no-op unless
    /// the stream channel is open. Emits the press immediately and schedules
    /// exactly one release after the configured gap.
    pub fn click_with(&self, hit: PointerHit, params: ClickParams) {
        if !self.manager.is_stream_connected() {
            return;
        }
        if hit.rendered_width <= 0.0 || hit.rendered_height <= 0.0 {
            warn!("rendered surface has no extent; ignoring pointer hit");
            return;
        }

        let (x, y) = map_to_canonical(hit, self.canonical);

        self.manager.send(&InputCommand::Mouse {
            event_type: MouseEventType::Pressed,
            x,
            y,
            button: params.button,
            click_count: Some(params.click_count),
        });

        let manager = self.manager.clone();
        let button = params.button;
        let gap = self.press_release_gap;
        tokio::spawn(async move {
            sleep(gap).await;
            manager.send(&InputCommand::Mouse {
                event_type: MouseEventType::Released,
                x,
                y,
                button,
                click_count: None,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_local_pixels_into_canonical_space() {
        let canonical = Viewport::default();
        let hit = PointerHit {
            x: 100.0,
            y: 50.0,
            rendered_width: 640.0,
            rendered_height: 400.0,
        };
        assert_eq!(map_to_canonical(hit, canonical), (200, 100));
    }

    #[test]
    fn identity_at_canonical_size() {
        let canonical = Viewport::default();
        let hit = PointerHit {
            x: 333.0,
            y: 777.0,
            rendered_width: 1280.0,
            rendered_height: 800.0,
        };
        assert_eq!(map_to_canonical(hit, canonical), (333, 777));
    }

    #[test]
    fn rounds_to_nearest_canonical_pixel() {
        let canonical = Viewport {
            width: 1280,
            height: 800,
        };
        // 100.3 * 1280 / 961 = 133.59... -> 134
        let hit = PointerHit {
            x: 100.3,
            y: 100.3,
            rendered_width: 961.0,
            rendered_height: 961.0,
        };
        let (x, y) = map_to_canonical(hit, canonical);
        assert_eq!(x, 134);
        // 100.3 * 800 / 961 = 83.49... -> 83
        assert_eq!(y, 83);
    }
}
