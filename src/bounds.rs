//! Size Bounds
//!
//! Validation and clamping of the `initial-size` / `maximum-size` pair shared
//! by the mapped and direct backends.
//!
//! Segments are addressed with signed 32-bit offsets, so the largest usable
//! region is `i32::MAX - 1023`: the largest multiple of 1024 that fits.
//!
//! ```text
//!   maximum' = clamp(maximum, 1, MAX_REGION_SIZE)
//!   initial' = clamp(initial, 1, maximum')
//! ```

use std::fmt;

/// Largest region size any backend will construct (2^31 - 1024)
pub const MAX_REGION_SIZE: u64 = (i32::MAX as u64) - 1023;

/// Sizes after clamping; always `1 <= initial <= maximum <= MAX_REGION_SIZE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedSizes {
    pub initial: u64,
    pub maximum: u64,
    pub warnings: Vec<SizeWarning>,
}

/// A configured size that was out of range and has been adjusted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeWarning {
    /// Configuration field name ("initial-size" or "maximum-size")
    pub field: &'static str,
    /// Value as configured (bytes)
    pub configured: i64,
    /// Value actually used (bytes)
    pub adjusted: u64,
}

impl fmt::Display for SizeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} specified ({} bytes); changed to: {} bytes",
            self.field, self.configured, self.adjusted
        )
    }
}

/// Clamp a configured `(initial, maximum)` pair into range.
///
/// Pure: warnings are returned, not logged.
pub fn clamp(initial: i64, maximum: i64) -> ClampedSizes {
    let max = (maximum.max(1) as u64).min(MAX_REGION_SIZE);
    let init = (initial.max(1) as u64).min(max);

    let mut warnings = Vec::new();
    if initial != init as i64 {
        warnings.push(SizeWarning {
            field: "initial-size",
            configured: initial,
            adjusted: init,
        });
    }
    if maximum != max as i64 {
        warnings.push(SizeWarning {
            field: "maximum-size",
            configured: maximum,
            adjusted: max,
        });
    }

    ClampedSizes {
        initial: init,
        maximum: max,
        warnings,
    }
}

impl ClampedSizes {
    /// Whether any value had to be adjusted
    pub fn was_adjusted(&self) -> bool {
        !self.warnings.is_empty()
    }
}
