// Declare submodules
pub mod listing_cascade;

// Re-export public items
pub use listing_cascade::{purge_listing, CascadeReport, CascadeStep, StepOutcome};
