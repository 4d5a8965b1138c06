//! Aquisicao Prospects - Dataset and Filter Evaluation
//!
//! Loads the prospect dataset through a [`ProspectRepository`] and selects
//! the rows matching a [`ProspectFilters`](aquisicao_core::ProspectFilters).
//! The selected IDs feed the assignment engine.

pub mod evaluator;
pub mod repository;
pub mod row;

pub use evaluator::{filter_prospects, row_matches, FilteredProspects};
pub use repository::{FileRepository, InMemoryProspects, ProspectRepository, ProspectTable};
pub use row::ProspectRow;
