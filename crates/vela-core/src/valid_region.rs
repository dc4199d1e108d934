use crate::{
    border::BorderSize,
    dimensions::{Coordinates, TensorShape, MAX_DIMS},
    error::KernelError,
};

/// Sub-rectangle of a tensor holding meaningful (non-border) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValidRegion {
    /// First valid coordinate on each axis.
    pub anchor: Coordinates,
    /// Number of valid elements on each axis.
    pub shape: TensorShape,
}

impl ValidRegion {
    /// Creates a region from an anchor and a shape.
    pub fn new(anchor: Coordinates, shape: TensorShape) -> Self {
        Self { anchor, shape }
    }

    /// The region spanning the whole of `shape`.
    pub fn full(shape: &TensorShape) -> Self {
        let mut anchor = Coordinates::default();
        anchor.set_num_dimensions(shape.num_dimensions());
        Self {
            anchor,
            shape: *shape,
        }
    }

    /// First valid index on axis `dim`.
    #[inline]
    pub fn start(&self, dim: usize) -> isize {
        self.anchor.get(dim)
    }

    /// One past the last valid index on axis `dim`.
    #[inline]
    pub fn end(&self, dim: usize) -> isize {
        self.anchor.get(dim) + self.shape.get(dim) as isize
    }

    /// Sets the valid range of axis `dim`.
    pub fn set(&mut self, dim: usize, start: isize, extent: usize) -> &mut Self {
        self.anchor.set(dim, start);
        self.shape.set(dim, extent);
        self
    }

    /// Returns true if the region holds no element.
    pub fn is_empty(&self) -> bool {
        self.shape.total_size() == 0
    }

    /// Returns true if `coords` lies inside the region.
    pub fn contains(&self, coords: &Coordinates) -> bool {
        (0..MAX_DIMS).all(|d| {
            let c = coords.get(d);
            c >= self.start(d) && c < self.end(d)
        })
    }

    /// Shrinks the region on x and y by `border`, as a filter with that halo does.
    pub fn shrink(&self, border: &BorderSize) -> Self {
        let mut region = *self;
        let shrink_axis = |region: &mut ValidRegion, dim: usize, before: usize, after: usize| {
            if before + after == 0 {
                return;
            }
            let extent = region.shape.get(dim).saturating_sub(before + after);
            let start = region.start(dim) + before as isize;
            region.set(dim, start, extent);
        };
        shrink_axis(&mut region, 0, border.left, border.right);
        shrink_axis(&mut region, 1, border.top, border.bottom);
        region
    }

    /// Clamps the region so it never extends past `shape`.
    pub fn clamped_to(&self, shape: &TensorShape) -> Self {
        let mut region = *self;
        for d in 0..MAX_DIMS {
            let start = self.start(d).clamp(0, shape.get(d) as isize);
            let end = self.end(d).clamp(start, shape.get(d) as isize);
            if start != self.start(d) || end != self.end(d) {
                region.set(d, start, (end - start) as usize);
            }
        }
        region
    }
}

/// Intersects `regions` axis by axis.
///
/// Axes below `upper_dim` take the per-axis overlap (possibly empty). Axes from
/// `upper_dim` upward must match exactly; a mismatch is a precondition error.
pub fn intersect_valid_regions(
    regions: &[ValidRegion],
    upper_dim: usize,
) -> Result<ValidRegion, KernelError> {
    let (first, rest) = regions
        .split_first()
        .ok_or_else(|| KernelError::precondition("no valid region to intersect"))?;

    let mut out = *first;
    for region in rest {
        for d in 0..MAX_DIMS {
            if d < upper_dim {
                let start = out.start(d).max(region.start(d));
                let end = out.end(d).min(region.end(d)).max(start);
                if start != out.start(d) || end != out.end(d) {
                    out.set(d, start, (end - start) as usize);
                }
            } else if out.start(d) != region.start(d) || out.end(d) != region.end(d) {
                return Err(KernelError::precondition(format!(
                    "valid regions differ on axis {d} above the intersected axes: [{}, {}) vs [{}, {})",
                    out.start(d),
                    out.end(d),
                    region.start(d),
                    region.end(d)
                )));
            }
        }
    }
    out.anchor
        .set_num_dimensions(regions.iter().map(|r| r.anchor.num_dimensions()).max().unwrap_or(0));
    Ok(out)
}
