//! Reading-order progress.

use crate::book::Section;

/// Books with this many sections or more get no per-section fractions.
pub const MAX_SECTIONS: usize = 100;

/// Cumulative size fraction at every boundary between linear sections.
///
/// Non-linear and empty sections count toward neither the position nor the
/// total. Returns one value per non-empty linear section except the last,
/// strictly increasing in (0, 1). Empty when the book has [`MAX_SECTIONS`]
/// or more sections, or no linear content.
pub fn toc_fractions(sections: &[Section]) -> Vec<f64> {
    if sections.len() >= MAX_SECTIONS {
        return Vec::new();
    }
    let sizes: Vec<u64> = sections
        .iter()
        .filter(|s| s.linear && s.size > 0)
        .map(|s| s.size)
        .collect();
    let total: u64 = sizes.iter().sum();
    let Some((_, boundaries)) = sizes.split_last().filter(|_| total > 0) else {
        return Vec::new();
    };

    let mut sum = 0u64;
    boundaries
        .iter()
        .map(|size| {
            sum += size;
            sum as f64 / total as f64
        })
        .collect()
}
