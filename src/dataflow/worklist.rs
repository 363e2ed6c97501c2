use std::collections::BTreeSet;

/// Instructions whose incoming state changed and must be reprocessed.
///
/// Pending instructions are drained in ascending order starting just after the last one
/// taken, wrapping back to the lowest once the end is passed. This is the order of repeated
/// front-to-back sweeps over the instruction array, so diagnostics are deterministic.
#[derive(Debug, Default)]
pub(crate) struct Worklist {
    pending: BTreeSet<usize>,
    cursor: usize,
}

impl Worklist {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `inumber` changed. Marking an already pending instruction is a no-op.
    pub(crate) fn push(&mut self, inumber: usize) {
        self.pending.insert(inumber);
    }

    pub(crate) fn pop(&mut self) -> Option<usize> {
        let next = self
            .pending
            .range(self.cursor..)
            .next()
            .or_else(|| self.pending.iter().next())
            .copied()?;
        self.pending.remove(&next);
        self.cursor = next + 1;
        Some(next)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
