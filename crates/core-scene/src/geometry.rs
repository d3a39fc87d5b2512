//! Minimal geometry for the command boundary: 2D points, axis-aligned boxes,
//! and the fit rule that maps screen-space pointer positions into artboard
//! space.

use std::ops::{Add, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2D {
    pub x: f32,
    pub y: f32,
}

impl Vec2D {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl Add for Vec2D {
    type Output = Vec2D;

    fn add(self, rhs: Vec2D) -> Vec2D {
        Vec2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2D {
    type Output = Vec2D;

    fn sub(self, rhs: Vec2D) -> Vec2D {
        Vec2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2D {
    type Output = Vec2D;

    fn mul(self, rhs: f32) -> Vec2D {
        Vec2D::new(self.x * rhs, self.y * rhs)
    }
}

/// Axis-aligned bounding box, `min` inclusive / `max` exclusive by
/// convention. Artboards report these as their local bounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub min: Vec2D,
    pub max: Vec2D,
}

impl Aabb {
    pub const fn new(min: Vec2D, max: Vec2D) -> Self {
        Self { min, max }
    }

    pub fn from_size(width: f32, height: f32) -> Self {
        Self::new(Vec2D::new(0.0, 0.0), Vec2D::new(width, height))
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn contains(&self, point: Vec2D) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }
}

/// How content is scaled into a view rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Fit {
    /// Uniform scale so the whole content fits inside the view.
    #[default]
    Contain = 0,
    /// Uniform scale so the content covers the whole view.
    Cover = 1,
    /// Non-uniform scale matching both view dimensions exactly.
    Fill = 2,
    /// Uniform scale matching the view width.
    FitWidth = 3,
    /// Uniform scale matching the view height.
    FitHeight = 4,
    /// Uniform scale that never exceeds 1.
    ScaleDown = 5,
    /// No scaling.
    None = 6,
}

impl Fit {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Fit::Contain),
            1 => Some(Fit::Cover),
            2 => Some(Fit::Fill),
            3 => Some(Fit::FitWidth),
            4 => Some(Fit::FitHeight),
            5 => Some(Fit::ScaleDown),
            6 => Some(Fit::None),
            _ => None,
        }
    }
}

/// Per-axis scale for `content` displayed inside `view` under `fit`.
fn fit_scale(fit: Fit, view: Vec2D, content: &Aabb) -> (f32, f32) {
    let sx = view.x / content.width();
    let sy = view.y / content.height();
    match fit {
        Fit::Fill => (sx, sy),
        Fit::Contain => {
            let s = sx.min(sy);
            (s, s)
        }
        Fit::Cover => {
            let s = sx.max(sy);
            (s, s)
        }
        Fit::FitWidth => (sx, sx),
        Fit::FitHeight => (sy, sy),
        Fit::ScaleDown => {
            let s = sx.min(sy).min(1.0);
            (s, s)
        }
        Fit::None => (1.0, 1.0),
    }
}

/// Maps a screen-space position back into artboard space.
///
/// `screen_bounds` is the size of the view rectangle the artboard is drawn
/// into under `fit` with centered alignment. A zero `screen_bounds` means
/// the caller recorded positions that are already in artboard space, and the
/// position passes through untouched.
pub fn artboard_point(fit: Fit, screen_bounds: Vec2D, position: Vec2D, artboard: &Aabb) -> Vec2D {
    if screen_bounds.is_zero() {
        return position;
    }
    let (sx, sy) = fit_scale(fit, screen_bounds, artboard);
    // Centered alignment: content is scaled, then centered in the view.
    let tx = (screen_bounds.x - artboard.width() * sx) * 0.5;
    let ty = (screen_bounds.y - artboard.height() * sy) * 0.5;
    Vec2D::new(
        (position.x - tx) / sx + artboard.min.x,
        (position.y - ty) / sy + artboard.min.y,
    )
}
