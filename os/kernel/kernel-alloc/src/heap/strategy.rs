use core::fmt;

/// How a free block is chosen for a request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocStrategy {
    /// The request's own class first, then larger classes, in list order.
    #[default]
    FirstFit,
    /// The smallest sufficient block in the whole heap.
    BestFit,
    /// The largest block in the whole heap. Diagnostic only.
    WorstFit,
    /// The first sufficient block after the last allocation, wrapping around.
    NextFit,
}

impl fmt::Display for AllocStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstFit => "first-fit",
            Self::BestFit => "best-fit",
            Self::WorstFit => "worst-fit",
            Self::NextFit => "next-fit",
        })
    }
}
