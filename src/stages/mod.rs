//! The pipeline stages, in run order.
//!
//! | Stage | Input | Output |
//! |-------|-------|--------|
//! | [`extract`] | one source page | that page's [`Candidate`](crate::models::Candidate)s |
//! | [`dedup`] | the day's candidate pool | candidates not selected in the trailing window |
//! | [`select`] | deduplicated pool | the day's [`SelectedItem`](crate::models::SelectedItem) shortlist |
//! | [`analyze`] | one selected item | its [`Analysis`](crate::models::Analysis) |
//! | [`aggregate`] | all analyses | the final report, handed to the publisher |
//!
//! Stages never touch checkpoints of other stages, except that aggregation
//! prunes skipped items from the selection checkpoint.

pub mod aggregate;
pub mod analyze;
pub mod dedup;
pub mod extract;
pub mod select;
