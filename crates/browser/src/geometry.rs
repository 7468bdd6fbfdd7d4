//! Rect arithmetic for visibility checks and click points.

use serde::Deserialize;

/// A measured element box plus the viewport it was measured in.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

/// Outcome of one visibility attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    FullyVisible,
    PartiallyVisible,
    /// Still off screen, but closer to the viewport than before.
    MadeProgress,
    Failed { diagnostics: String },
}

impl Visibility {
    /// Whether the element can be interacted with after this outcome.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// A viewport point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Measurement {
    fn right(&self) -> f64 {
        self.x + self.width
    }

    fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn fully_visible(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= self.viewport_width
            && self.bottom() <= self.viewport_height
    }

    pub fn intersects_viewport(&self) -> bool {
        self.right() > 0.0
            && self.bottom() > 0.0
            && self.x < self.viewport_width
            && self.y < self.viewport_height
    }

    /// Distance from the element center to the viewport center.
    pub fn distance_from_center(&self) -> f64 {
        let cx = self.x + self.width / 2.0 - self.viewport_width / 2.0;
        let cy = self.y + self.height / 2.0 - self.viewport_height / 2.0;
        (cx * cx + cy * cy).sqrt()
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    /// Classify a measurement taken after a scroll, relative to one taken before it.
    pub fn visibility_since(&self, before: &Measurement) -> Visibility {
        if !self.is_finite() {
            return Visibility::Failed {
                diagnostics: self.describe(),
            };
        }
        if self.fully_visible() {
            Visibility::FullyVisible
        } else if self.intersects_viewport() {
            Visibility::PartiallyVisible
        } else if self.distance_from_center() + 1.0 < before.distance_from_center() {
            Visibility::MadeProgress
        } else {
            Visibility::Failed {
                diagnostics: format!("no progress: before {}, after {}", before.describe(), self.describe()),
            }
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "rect ({:.1}, {:.1}, {:.1}x{:.1}) in viewport {:.0}x{:.0}",
            self.x, self.y, self.width, self.height, self.viewport_width, self.viewport_height
        )
    }
}
