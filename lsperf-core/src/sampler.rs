//! Identifier Sampler
//!
//! Chooses which identifier positions of a package get measured. The choice is
//! deterministic so two runs of the same package version measure the same
//! positions.
//!
//! When the identifier stream is longer than the cap, the cap is split into
//! three bands: 5% from the start, 20% from the end, and the remainder strided
//! evenly through the interior.

use crate::service::SourceFile;

/// Share of the cap taken from the start of the stream, in percent
pub const START_BAND_PERCENT: usize = 5;

/// Share of the cap taken from the end of the stream, in percent
pub const END_BAND_PERCENT: usize = 20;

/// A location to measure, with the identifier details kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePosition {
    /// Source file
    pub file: String,
    /// Character offset of the identifier
    pub offset: u32,
    /// Identifier text
    pub identifier_text: String,
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
}

/// How a cap is split across the three bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePlan {
    /// Items kept from the start
    pub start: usize,
    /// Items kept from the end
    pub end: usize,
    /// Budget for the strided interior
    pub interior: usize,
}

impl SamplePlan {
    /// Split `cap` into bands. The start and end bands never exceed the cap.
    pub fn for_cap(cap: usize) -> Self {
        let start = (cap * START_BAND_PERCENT).div_ceil(100).min(cap);
        let end = (cap * END_BAND_PERCENT).div_ceil(100).min(cap - start);
        Self {
            start,
            end,
            interior: cap - start - end,
        }
    }
}

/// Select an order-preserving subsequence of at most `max_positions` items.
///
/// Without a cap, or when the stream already fits, the input is returned unchanged.
pub fn sample_identifiers<T: Clone>(items: &[T], max_positions: Option<usize>) -> Vec<T> {
    let cap = match max_positions {
        Some(cap) if items.len() > cap => cap,
        _ => return items.to_vec(),
    };

    let plan = SamplePlan::for_cap(cap);
    // len > cap >= start + end, so the bands never overlap
    let interior_end = items.len() - plan.end;
    let interior = &items[plan.start..interior_end];

    let mut sampled = Vec::with_capacity(cap);
    sampled.extend_from_slice(&items[..plan.start]);
    if plan.interior > 0 && !interior.is_empty() {
        let stride = interior.len().div_ceil(plan.interior);
        sampled.extend(interior.iter().step_by(stride).cloned());
    }
    sampled.extend_from_slice(&items[interior_end..]);
    sampled
}

/// Number of identifiers in the files that are eligible for measurement.
pub fn measurable_identifier_count(files: &[SourceFile]) -> usize {
    files
        .iter()
        .filter(|f| f.is_measurable())
        .map(|f| f.identifiers.len())
        .sum()
}

/// Sample positions across a package's measurable files.
///
/// The cap is package-wide: files contribute in list order, identifiers in
/// source order, and the sampler runs over that combined stream.
pub fn sample_package_positions(
    files: &[SourceFile],
    max_positions: Option<usize>,
) -> Vec<SamplePosition> {
    let stream: Vec<SamplePosition> = files
        .iter()
        .filter(|f| f.is_measurable())
        .flat_map(|f| {
            f.identifiers.iter().map(move |id| SamplePosition {
                file: f.path.clone(),
                offset: id.offset,
                identifier_text: id.text.clone(),
                line: id.line,
                column: id.column,
            })
        })
        .collect();

    sample_identifiers(&stream, max_positions)
}
