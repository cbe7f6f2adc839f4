pub mod report;
pub mod slug;

pub use report::{HealReport, StepOutcome, StepReport};
pub use slug::{slug_base, SlugAllocator, FALLBACK_SLUG_BASE};
