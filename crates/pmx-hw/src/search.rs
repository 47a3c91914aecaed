/// Physical memory pattern search parameters.
///
/// Built with [`PatternSearch::new`] and adjusted with the chained setters; defaults are
/// a forward scan at byte granularity reporting the first match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSearch<'a> {
    pub address: u64,
    pub size: u32,
    pub pattern: &'a [u8],
    /// Distance between candidate addresses.
    pub step: u32,
    /// Matches to pass over before reporting one.
    pub skip: u32,
    /// Scan from the end of the range towards `address`.
    pub backwards: bool,
}

impl<'a> PatternSearch<'a> {
    pub const fn new(address: u64, size: u32, pattern: &'a [u8]) -> Self {
        Self {
            address,
            size,
            pattern,
            step: 1,
            skip: 0,
            backwards: false,
        }
    }

    pub const fn step(self, step: u32) -> Self {
        Self { step, ..self }
    }

    pub const fn skip(self, skip: u32) -> Self {
        Self { skip, ..self }
    }

    pub const fn backwards(self) -> Self {
        Self {
            backwards: true,
            ..self
        }
    }
}
