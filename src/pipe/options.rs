//! Pipe session options

/// Options accepted by [`attach`](super::attach) and
/// [`Pipe::pipe_with`](super::Pipe::pipe_with)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// Auto-finalize the destination when the last source finishes
    pub end: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}

impl PipeOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the destination is auto-finalized (default `true`)
    ///
    /// With `end(false)` this session never calls `end`/`destroy` on the
    /// destination and never touches its pipe-count; the caller owns
    /// finalization.
    pub fn end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_auto_finalizes() {
        assert!(PipeOptions::default().end);
        assert!(PipeOptions::new().end);
    }

    #[test]
    fn test_builder_end() {
        assert!(!PipeOptions::default().end(false).end);
        assert!(PipeOptions::default().end(false).end(true).end);
    }
}
