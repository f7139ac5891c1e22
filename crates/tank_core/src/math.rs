//! Fixed-point scalars, vectors and trigonometry.
//!
//! Positions, speeds, timers and headings are all [`Fixed`]. Headings are
//! radians; the trig functions are polynomial so two machines fed the same
//! inputs land on the same bits.

use fixed::consts;
use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Simulation scalar: 32 integer bits and 32 fractional bits.
pub type Fixed = I32F32;

/// World-space position or displacement.
///
/// Serialized through `fixed`'s serde support, which writes the raw bits
/// so values survive a round trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    pub x: Fixed,
    /// Y coordinate.
    pub y: Fixed,
}

/// π as a [`Fixed`].
#[must_use]
pub fn pi() -> Fixed {
    Fixed::from_num(consts::PI)
}

/// π/2 as a [`Fixed`].
#[must_use]
pub fn half_pi() -> Fixed {
    Fixed::from_num(consts::FRAC_PI_2)
}

/// 2π as a [`Fixed`].
#[must_use]
pub fn tau() -> Fixed {
    Fixed::from_num(consts::TAU)
}

/// Exact `numerator / denominator` without going through floats.
#[must_use]
pub fn ratio(numerator: i32, denominator: i32) -> Fixed {
    if denominator == 0 {
        return Fixed::ZERO;
    }
    Fixed::from_num(numerator) / Fixed::from_num(denominator)
}

/// Wraps an angle into `[-π, π]`.
#[must_use]
pub fn wrap_angle(angle: Fixed) -> Fixed {
    let pi = pi();
    let tau = tau();
    let mut a = angle % tau;
    if a > pi {
        a -= tau;
    } else if a < -pi {
        a += tau;
    }
    a
}

/// Sine of an angle in radians.
///
/// Range-reduced to `[-π/2, π/2]`, then a Taylor series through x¹¹.
/// Absolute error stays below 1e-6 on the reduced range.
#[must_use]
pub fn sin(angle: Fixed) -> Fixed {
    let pi = pi();
    let half = half_pi();
    let mut x = wrap_angle(angle);
    if x > half {
        x = pi - x;
    } else if x < -half {
        x = -pi - x;
    }

    let one = Fixed::ONE;
    let x2 = x * x;
    let mut t = one - x2 / Fixed::from_num(110);
    t = one - x2 / Fixed::from_num(72) * t;
    t = one - x2 / Fixed::from_num(42) * t;
    t = one - x2 / Fixed::from_num(20) * t;
    t = one - x2 / Fixed::from_num(6) * t;
    x * t
}

/// Cosine of an angle in radians.
#[must_use]
pub fn cos(angle: Fixed) -> Fixed {
    sin(angle + half_pi())
}

/// Four-quadrant arctangent, returning an angle in `[-π, π]`.
///
/// `atan2(0, 0)` is defined as zero.
#[must_use]
pub fn atan2(y: Fixed, x: Fixed) -> Fixed {
    if x == Fixed::ZERO && y == Fixed::ZERO {
        return Fixed::ZERO;
    }

    let ax = x.abs();
    let ay = y.abs();
    let (z, swapped) = if ay > ax { (ax / ay, true) } else { (ay / ax, false) };

    let mut angle = atan_unit(z);
    if swapped {
        angle = half_pi() - angle;
    }
    if x < Fixed::ZERO {
        angle = pi() - angle;
    }
    if y < Fixed::ZERO {
        angle = -angle;
    }
    angle
}

/// Arctangent for `z` in `[0, 1]` (Abramowitz & Stegun 4.4.49, error < 1e-5).
fn atan_unit(z: Fixed) -> Fixed {
    let z2 = z * z;
    let c1 = ratio(9_998_660, 10_000_000);
    let c3 = ratio(-3_302_995, 10_000_000);
    let c5 = ratio(1_801_410, 10_000_000);
    let c7 = ratio(-851_330, 10_000_000);
    let c9 = ratio(208_351, 10_000_000);
    z * (c1 + z2 * (c3 + z2 * (c5 + z2 * (c7 + z2 * c9))))
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer components.
    #[must_use]
    pub fn from_int(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Unit vector pointing along `angle`, scaled by `length`.
    #[must_use]
    pub fn from_angle(angle: Fixed, length: Fixed) -> Self {
        Self::new(cos(angle) * length, sin(angle) * length)
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// True when `other` lies within `range` of `self` (inclusive).
    #[must_use]
    pub fn within(self, other: Self, range: Fixed) -> bool {
        self.distance_squared(other) <= range.saturating_mul(range)
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Vector length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Multiply both components by a scalar.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Angle of this vector, as used for headings.
    #[must_use]
    pub fn angle(self) -> Fixed {
        atan2(self.y, self.x)
    }

    /// Clamp both components into the rectangle `[min, max]`.
    #[must_use]
    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self::new(self.x.clamp(min.x, max.x), self.y.clamp(min.y, max.y))
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self.length() {
            len if len == Fixed::ZERO => Self::ZERO,
            len => Self::new(self.x / len, self.y / len),
        }
    }
}

/// Square root by bisection. Zero for non-positive input.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::ONE { value } else { Fixed::ONE };

    for _ in 0..64 {
        let mid = low + (high - low) / Fixed::from_num(2);
        if mid == low {
            break;
        }
        if mid.saturating_mul(mid) <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::AddAssign for Vec2Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Neg for Vec2Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}
