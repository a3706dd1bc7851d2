//! Bounded excerpts of a diff, centred on the first divergence.

use std::collections::VecDeque;

use crate::compare::DiffLine;

/// Lines kept before the first divergence when no window is given.
pub const DEFAULT_CONTEXT_WINDOW: usize = 20;

/// Lines shown after the first divergence.
pub const TRAILING_CONTEXT: usize = 5;

/// A bounded excerpt of `diff_lines` around the first divergence: up to
/// `context_window` lines ending with the first disagreement, followed by up
/// to [`TRAILING_CONTEXT`] more. Without a divergence, the last
/// `context_window` lines.
pub fn summarize(diff_lines: &[DiffLine], context_window: usize) -> Vec<String> {
    let mut window = VecDeque::with_capacity(context_window + TRAILING_CONTEXT);
    let mut lines = diff_lines.iter();

    for line in lines.by_ref() {
        if window.len() == context_window {
            window.pop_front();
        }
        if context_window > 0 {
            window.push_back(line.to_string());
        }
        if line.is_disagreement() {
            window.extend(lines.take(TRAILING_CONTEXT).map(ToString::to_string));
            break;
        }
    }
    window.into()
}
