//! Positional N-way comparison of canonical traces.
//!
//! The first trace is the reference. Every position where any other trace
//! differs from it is a divergence, and a trace that ran out of steps
//! early differs from every trace that did not.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::step::CanonicalStep;

/// Rendering of a position a trace never reached.
pub const EXHAUSTED: &str = "(exhausted)";

/// One line of the combined diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffLine {
    /// Every trace has the same entry at `index`.
    Agree { index: usize, text: String },
    /// What `client` has at a divergent `index`. Divergent positions produce
    /// one of these per client, the reference included.
    Disagree {
        index: usize,
        client: String,
        text: String,
    },
}

impl DiffLine {
    pub fn index(&self) -> usize {
        match self {
            DiffLine::Agree { index, .. } | DiffLine::Disagree { index, .. } => *index,
        }
    }

    pub fn is_disagreement(&self) -> bool {
        matches!(self, DiffLine::Disagree { .. })
    }
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Agree { index, text } => write!(f, "[*]  {index} {text}"),
            DiffLine::Disagree {
                index,
                client,
                text,
            } => write!(f, "[!!] {index} {client}: {text}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub equivalent: bool,
    pub diff_lines: Vec<DiffLine>,
    /// Every divergent position, in order.
    pub divergences: Vec<usize>,
}

impl ComparisonResult {
    pub fn first_divergence(&self) -> Option<usize> {
        self.divergences.first().copied()
    }

    /// The full diff, one line per entry.
    pub fn render(&self) -> String {
        self.diff_lines
            .iter()
            .map(|line| format!("{line}\n"))
            .collect()
    }
}

/// Compares `traces` position by position. `names[i]` labels `traces[i]` in
/// the diff; traces without a name are labelled by their position.
pub fn compare<S: AsRef<str>>(traces: &[Vec<CanonicalStep>], names: &[S]) -> ComparisonResult {
    let label = |i: usize| {
        names
            .get(i)
            .map_or_else(|| format!("#{i}"), |it| it.as_ref().to_owned())
    };
    let render = |entry: Option<&CanonicalStep>| {
        entry.map_or_else(|| EXHAUSTED.to_owned(), ToString::to_string)
    };

    let len = traces.iter().map(Vec::len).max().unwrap_or_default();
    let mut diff_lines = Vec::with_capacity(len);
    let mut divergences = Vec::new();

    for index in 0..len {
        let entries: Vec<Option<&CanonicalStep>> =
            traces.iter().map(|trace| trace.get(index)).collect();
        let reference = entries[0];
        if entries[1..].iter().all(|it| *it == reference) {
            diff_lines.push(DiffLine::Agree {
                index,
                text: render(reference),
            });
            continue;
        }
        divergences.push(index);
        diff_lines.extend(
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| DiffLine::Disagree {
                    index,
                    client: label(i),
                    text: render(*entry),
                }),
        );
    }

    ComparisonResult {
        equivalent: divergences.is_empty(),
        diff_lines,
        divergences,
    }
}
