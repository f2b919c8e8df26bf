//! Sliding-window geometry for the pyramid.
//!
//! Window *k* over `total` units covers `[k·S, min(k·S + W, total))`. The last
//! window is truncated to the units available rather than padded.
//!
//! Planning stops at the first window that reaches the end. This is not the
//! plain `while k·S < total` loop: that loop keeps emitting windows whose
//! start is still below `total`, so 9 units with `W = 5, S = 4` would also get
//! a trailing `[8, 9)` that lies entirely inside `[4, 9)`, and with `S = 1` a
//! level could be no smaller than the one below it. Stopping at the end plus
//! `W >= 2` makes every level strictly smaller.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::{PyramidConfig, WindowConfig};
use crate::error::Result;

/// A half-open span `[start, end)` of units at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }
}

/// Renders as a 1-based inclusive range, e.g. `[4, 9)` prints `5-9`.
impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start + 1, self.end)
    }
}

/// Plan the windows covering `total` units.
pub fn plan_windows(total: usize, config: WindowConfig) -> Result<Vec<Window>> {
    config.validate()?;
    if total == 0 {
        return Ok(Vec::new());
    }
    if total <= config.window_size {
        return Ok(vec![Window::new(0, total)]);
    }

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + config.window_size).min(total);
        windows.push(Window::new(start, end));
        if end == total {
            break;
        }
        start += config.stride;
    }
    Ok(windows)
}

/// Unit counts of every pyramid level for `chunk_count` chunks, level 0 first.
///
/// Purely structural: no backend calls. `[23, 6, 2, 1]` for 23 chunks with
/// windows of 5 and a stride of 4.
pub fn plan_level_sizes(chunk_count: usize, config: &PyramidConfig) -> Result<Vec<usize>> {
    config.validate()?;
    let mut sizes = vec![chunk_count];
    let mut units = chunk_count;
    let mut level = 1;
    while units > 1 || (level == 1 && units == 1) {
        units = plan_windows(units, config.windows_for_level(level))?.len();
        sizes.push(units);
        level += 1;
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn spans(windows: &[Window]) -> Vec<(usize, usize)> {
        windows.iter().map(|w| (w.start, w.end)).collect()
    }

    #[test]
    fn example_geometry() {
        let config = WindowConfig::new(5, 4);
        assert_eq!(
            spans(&plan_windows(23, config).unwrap()),
            [(0, 5), (4, 9), (8, 13), (12, 17), (16, 21), (20, 23)]
        );
        assert_eq!(spans(&plan_windows(6, config).unwrap()), [(0, 5), (4, 6)]);
        assert_eq!(spans(&plan_windows(2, config).unwrap()), [(0, 2)]);
    }

    #[test]
    fn no_trailing_window_inside_the_last_full_one() {
        let config = WindowConfig::new(5, 4);
        // A start-below-total loop would add (8, 9) here.
        assert_eq!(spans(&plan_windows(9, config).unwrap()), [(0, 5), (4, 9)]);
        // And (16, 17) here.
        assert_eq!(
            spans(&plan_windows(17, config).unwrap()),
            [(0, 5), (4, 9), (8, 13), (12, 17)]
        );
    }

    #[test]
    fn level_sizes_for_example() {
        let sizes = plan_level_sizes(23, &PyramidConfig::uniform(5, 4)).unwrap();
        assert_eq!(sizes, [23, 6, 2, 1]);
    }

    #[test]
    fn small_inputs_take_one_level() {
        let config = PyramidConfig::uniform(5, 4);
        assert_eq!(plan_level_sizes(5, &config).unwrap(), [5, 1]);
        assert_eq!(plan_level_sizes(1, &config).unwrap(), [1, 1]);
        assert_eq!(plan_level_sizes(0, &config).unwrap(), [0]);
    }

    #[test]
    fn windows_cover_everything_and_step_by_stride() {
        for total in 1..60 {
            for w in 2..8 {
                for s in 1..=w {
                    let windows = plan_windows(total, WindowConfig::new(w, s)).unwrap();
                    for i in 0..total {
                        assert!(
                            windows.iter().any(|win| win.contains(i)),
                            "unit {i} uncovered (total={total}, W={w}, S={s})"
                        );
                    }
                    for pair in windows.windows(2) {
                        assert_eq!(pair[1].start, pair[0].start + s);
                    }
                    assert!(windows.iter().all(|win| win.end <= total && !win.is_empty()));
                    if total > 1 {
                        assert!(windows.len() < total);
                    }
                }
            }
        }
    }

    #[test]
    fn level_sizes_strictly_decrease() {
        for n in 2..200 {
            for (w, s) in [(2, 1), (2, 2), (3, 1), (5, 4), (8, 8)] {
                let sizes = plan_level_sizes(n, &PyramidConfig::uniform(w, s)).unwrap();
                assert_eq!(*sizes.last().unwrap(), 1);
                assert!(sizes.windows(2).all(|p| p[1] < p[0]), "{sizes:?}");
            }
        }
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        assert!(matches!(
            plan_windows(10, WindowConfig::new(3, 4)),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            plan_windows(10, WindowConfig::new(3, 0)),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn display_is_one_based() {
        assert_eq!(Window::new(4, 9).to_string(), "5-9");
        assert_eq!(Window::new(0, 1).to_string(), "1-1");
    }
}
