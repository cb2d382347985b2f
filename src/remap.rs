//! Linear value rescaling between device and network ranges

/// Rescale `value` from `[in_min, in_max]` to `[out_min, out_max]`.
///
/// A degenerate input range (`in_min == in_max`) maps every input to
/// `out_min`. No clamping is applied; callers clamp where the target
/// protocol requires it.
pub fn remap(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if in_max == in_min {
        return out_min;
    }
    let scaled = (value - in_min) / (in_max - in_min);
    out_min + scaled * (out_max - out_min)
}

/// A closed numeric range as stored in a mapping entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Lower and upper bound regardless of orientation (ranges may be inverted)
    pub fn bounds(&self) -> (f64, f64) {
        if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        }
    }

    /// Rescale a value from this range into `to`
    pub fn remap_into(&self, value: f64, to: &Range) -> f64 {
        remap(value, self.min, self.max, to.min, to.max)
    }
}
