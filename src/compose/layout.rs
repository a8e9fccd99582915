//! Composition layouts and their geometry

use super::bitmap::Rect;
use crate::capture::DeviceRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Divider between side-by-side halves
pub const DIVIDER_WIDTH: u32 = 2;
pub const DIVIDER_COLOR: [u8; 4] = [255, 255, 255, 255];

/// PiP inset placement
pub const INSET_MARGIN: u32 = 16;
pub const INSET_BORDER: u32 = 3;
pub const INSET_BORDER_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Corner of the canvas holding a PiP inset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// How the two camera streams are arranged in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Layout {
    SideBySideHorizontal,
    SideBySideVertical,
    PipTopLeft,
    PipTopRight,
    PipBottomLeft,
    PipBottomRight,
    SingleBack,
    SingleFront,
}

impl Default for Layout {
    fn default() -> Self {
        Self::PipBottomRight
    }
}

impl Layout {
    pub const ALL: [Layout; 8] = [
        Layout::SideBySideHorizontal,
        Layout::SideBySideVertical,
        Layout::PipTopLeft,
        Layout::PipTopRight,
        Layout::PipBottomLeft,
        Layout::PipBottomRight,
        Layout::SingleBack,
        Layout::SingleFront,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Layout::SideBySideHorizontal => "sideBySideHorizontal",
            Layout::SideBySideVertical => "sideBySideVertical",
            Layout::PipTopLeft => "pipTopLeft",
            Layout::PipTopRight => "pipTopRight",
            Layout::PipBottomLeft => "pipBottomLeft",
            Layout::PipBottomRight => "pipBottomRight",
            Layout::SingleBack => "singleBack",
            Layout::SingleFront => "singleFront",
        }
    }

    pub fn corner(self) -> Option<Corner> {
        match self {
            Layout::PipTopLeft => Some(Corner::TopLeft),
            Layout::PipTopRight => Some(Corner::TopRight),
            Layout::PipBottomLeft => Some(Corner::BottomLeft),
            Layout::PipBottomRight => Some(Corner::BottomRight),
            _ => None,
        }
    }

    pub fn is_pip(self) -> bool {
        self.corner().is_some()
    }

    /// The only device a single layout shows
    pub fn single_role(self) -> Option<DeviceRole> {
        match self {
            Layout::SingleBack => Some(DeviceRole::Back),
            Layout::SingleFront => Some(DeviceRole::Front),
            _ => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Layout {
    type Err = String;

    /// Accepts camelCase, snake_case and kebab-case names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Layout::ALL
            .into_iter()
            .find(|layout| layout.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown layout: {s}"))
    }
}

/// One device's destination on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub role: DeviceRole,
    pub rect: Rect,
    /// Border thickness drawn around the rect, for insets
    pub border: Option<u32>,
}

/// Where everything goes for one layout at one canvas size.
/// Placements are in draw order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    pub placements: Vec<Placement>,
    pub divider: Option<Rect>,
}

/// Main (full-frame / first half) and inset (overlay / second half) roles
pub fn main_and_inset(swapped: bool) -> (DeviceRole, DeviceRole) {
    if swapped {
        (DeviceRole::Front, DeviceRole::Back)
    } else {
        (DeviceRole::Back, DeviceRole::Front)
    }
}

/// Compute the layout geometry for a `width` x `height` canvas.
pub fn plan(layout: Layout, swapped: bool, width: u32, height: u32) -> LayoutPlan {
    let (main, inset) = main_and_inset(swapped);
    let full = Rect::new(0, 0, width, height);

    match layout {
        Layout::SideBySideHorizontal => {
            let half = width / 2;
            LayoutPlan {
                placements: vec![
                    Placement { role: main, rect: Rect::new(0, 0, half, height), border: None },
                    Placement {
                        role: inset,
                        rect: Rect::new(half as i32, 0, width - half, height),
                        border: None,
                    },
                ],
                divider: Some(Rect::new(
                    half as i32 - (DIVIDER_WIDTH / 2) as i32,
                    0,
                    DIVIDER_WIDTH,
                    height,
                )),
            }
        }
        Layout::SideBySideVertical => {
            let half = height / 2;
            LayoutPlan {
                placements: vec![
                    Placement { role: main, rect: Rect::new(0, 0, width, half), border: None },
                    Placement {
                        role: inset,
                        rect: Rect::new(0, half as i32, width, height - half),
                        border: None,
                    },
                ],
                divider: Some(Rect::new(
                    0,
                    half as i32 - (DIVIDER_WIDTH / 2) as i32,
                    width,
                    DIVIDER_WIDTH,
                )),
            }
        }
        Layout::PipTopLeft | Layout::PipTopRight | Layout::PipBottomLeft | Layout::PipBottomRight => {
            let inset_w = width / 4;
            let inset_h = height / 4;
            // Keep the inset on canvas for very small outputs
            let margin = INSET_MARGIN
                .min((width - inset_w) / 2)
                .min((height - inset_h) / 2);
            let left = margin as i32;
            let right = (width - inset_w - margin) as i32;
            let top = margin as i32;
            let bottom = (height - inset_h - margin) as i32;
            let (x, y) = match layout.corner() {
                Some(Corner::TopLeft) => (left, top),
                Some(Corner::TopRight) => (right, top),
                Some(Corner::BottomLeft) => (left, bottom),
                _ => (right, bottom),
            };
            LayoutPlan {
                placements: vec![
                    Placement { role: main, rect: full, border: None },
                    Placement {
                        role: inset,
                        rect: Rect::new(x, y, inset_w, inset_h),
                        border: Some(INSET_BORDER),
                    },
                ],
                divider: None,
            }
        }
        Layout::SingleBack | Layout::SingleFront => LayoutPlan {
            placements: vec![Placement {
                role: layout.single_role().unwrap_or(DeviceRole::Back),
                rect: full,
                border: None,
            }],
            divider: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names_round_trip_through_from_str() {
        for layout in Layout::ALL {
            assert_eq!(layout.name().parse::<Layout>().unwrap(), layout);
        }
        assert_eq!("pip_top_left".parse::<Layout>().unwrap(), Layout::PipTopLeft);
        assert_eq!("SIDE-BY-SIDE-VERTICAL".parse::<Layout>().unwrap(), Layout::SideBySideVertical);
        assert!("diagonal".parse::<Layout>().is_err());
    }

    #[test]
    fn test_side_by_side_halves() {
        let p = plan(Layout::SideBySideHorizontal, false, 1280, 720);
        assert_eq!(p.placements[0].role, DeviceRole::Back);
        assert_eq!(p.placements[0].rect, Rect::new(0, 0, 640, 720));
        assert_eq!(p.placements[1].rect, Rect::new(640, 0, 640, 720));
        assert_eq!(p.divider, Some(Rect::new(639, 0, 2, 720)));

        let p = plan(Layout::SideBySideVertical, false, 1280, 720);
        assert_eq!(p.placements[1].rect, Rect::new(0, 360, 1280, 360));
    }

    #[test]
    fn test_pip_inset_is_quarter_size_in_corner() {
        let p = plan(Layout::PipBottomRight, false, 1280, 720);
        let inset = p.placements[1];
        assert_eq!(inset.role, DeviceRole::Front);
        assert_eq!(inset.rect, Rect::new(1280 - 320 - 16, 720 - 180 - 16, 320, 180));
        assert_eq!(inset.border, Some(INSET_BORDER));

        let p = plan(Layout::PipTopLeft, false, 1280, 720);
        assert_eq!(p.placements[1].rect, Rect::new(16, 16, 320, 180));
    }

    #[test]
    fn test_swap_reverses_main_and_inset() {
        let p = plan(Layout::PipTopRight, true, 640, 480);
        assert_eq!(p.placements[0].role, DeviceRole::Front);
        assert_eq!(p.placements[1].role, DeviceRole::Back);
    }

    #[test]
    fn test_single_ignores_swap() {
        let p = plan(Layout::SingleFront, true, 640, 480);
        assert_eq!(p.placements.len(), 1);
        assert_eq!(p.placements[0].role, DeviceRole::Front);
        assert_eq!(p.placements[0].rect, Rect::new(0, 0, 640, 480));
    }
}
