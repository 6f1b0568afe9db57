//! Grouping of pending operations into encoder groups.
//!
//! A flushed log is cut into windows of at most `window_size` operations; each window becomes one
//! command buffer. Inside a window, consecutive operations of the same kind form one group, which
//! the submission engine encodes with a single encoder. Groups never cross a window boundary and
//! never reorder operations.
use crate::command::OperationKind;
use std::ops::Range;

/// A run of consecutive operations of the same kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncoderGroup {
    pub kind: OperationKind,
    /// Positions of the operations in the log.
    pub log_range: Range<usize>,
    /// Positions of the operations in the side table of `kind`.
    pub entries: Range<usize>,
}

/// Operations encoded into one command buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Window {
    pub log_range: Range<usize>,
    pub groups: Vec<EncoderGroup>,
}

/// Next side table position of each operation kind.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KindCursors([usize; 6]);

impl KindCursors {
    fn advance(&mut self, kind: OperationKind, count: usize) -> Range<usize> {
        let start = self.0[kind.index()];
        self.0[kind.index()] = start + count;
        start..start + count
    }
}

/// Splits a window of the kind sequence into runs. `base` is the position of the window in the log.
pub fn plan_window(
    kinds: &[OperationKind],
    base: usize,
    cursors: &mut KindCursors,
) -> Vec<EncoderGroup> {
    let mut groups = Vec::new();
    let mut run_start = 0;
    for i in 1..=kinds.len() {
        if i == kinds.len() || kinds[i] != kinds[run_start] {
            let kind = kinds[run_start];
            groups.push(EncoderGroup {
                kind,
                log_range: base + run_start..base + i,
                entries: cursors.advance(kind, i - run_start),
            });
            run_start = i;
        }
    }
    groups
}

/// Plans a whole flushed log.
pub fn plan(kinds: &[OperationKind], window_size: usize) -> Vec<Window> {
    assert!(window_size > 0, "window size must be non-zero");
    let mut cursors = KindCursors::default();
    kinds
        .chunks(window_size)
        .enumerate()
        .map(|(i, chunk)| {
            let base = i * window_size;
            Window {
                log_range: base..base + chunk.len(),
                groups: plan_window(chunk, base, &mut cursors),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationKind::*;

    #[test]
    fn runs_collapse_into_groups() {
        let kinds = [Blit, Blit, Render, Render, Render, Event, Blit];
        let windows = plan(&kinds, 128);
        assert_eq!(windows.len(), 1);
        assert_eq!(
            windows[0].groups,
            vec![
                EncoderGroup {
                    kind: Blit,
                    log_range: 0..2,
                    entries: 0..2
                },
                EncoderGroup {
                    kind: Render,
                    log_range: 2..5,
                    entries: 0..3
                },
                EncoderGroup {
                    kind: Event,
                    log_range: 5..6,
                    entries: 0..1
                },
                EncoderGroup {
                    kind: Blit,
                    log_range: 6..7,
                    entries: 2..3
                },
            ]
        );
    }

    #[test]
    fn empty_log_has_no_windows() {
        assert!(plan(&[], 128).is_empty());
        let mut cursors = KindCursors::default();
        assert!(plan_window(&[], 0, &mut cursors).is_empty());
    }

    #[test]
    fn windows_split_runs() {
        let kinds = vec![Native; 513];
        let windows = plan(&kinds, 128);
        assert_eq!(windows.len(), 5);
        for (i, window) in windows.iter().take(4).enumerate() {
            assert_eq!(window.log_range, i * 128..(i + 1) * 128);
            assert_eq!(window.groups.len(), 1);
            assert_eq!(window.groups[0].entries, i * 128..(i + 1) * 128);
        }
        assert_eq!(windows[4].log_range, 512..513);
        assert_eq!(windows[4].groups[0].entries, 512..513);
    }

    #[test]
    fn cursors_carry_across_windows() {
        let kinds = [Render, Blit, Render, Render, Blit];
        let windows = plan(&kinds, 2);
        let groups: Vec<_> = windows.iter().flat_map(|w| w.groups.iter().cloned()).collect();
        assert_eq!(
            groups,
            vec![
                EncoderGroup {
                    kind: Render,
                    log_range: 0..1,
                    entries: 0..1
                },
                EncoderGroup {
                    kind: Blit,
                    log_range: 1..2,
                    entries: 0..1
                },
                EncoderGroup {
                    kind: Render,
                    log_range: 2..4,
                    entries: 1..3
                },
                EncoderGroup {
                    kind: Blit,
                    log_range: 4..5,
                    entries: 1..2
                },
            ]
        );
    }

    #[test]
    fn groups_cover_the_log_in_order() {
        let kinds = [Event, Blit, Compute, Compute, Native, Present, Render, Event, Event];
        for window_size in 1..=kinds.len() {
            let windows = plan(&kinds, window_size);
            let mut next = 0;
            for group in windows.iter().flat_map(|w| &w.groups) {
                assert_eq!(group.log_range.start, next);
                assert!(kinds[group.log_range.clone()].iter().all(|&k| k == group.kind));
                next = group.log_range.end;
            }
            assert_eq!(next, kinds.len());
        }
    }
}
