//! Data layer: core types, loading, formatting and partitioning.
//!
//! Architecture:
//! ```text
//!  .parquet / .json / .csv
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  parse file → StructuredData (no target)
//!   └──────────┘
//!        │
//!        ▼
//!   ┌───────────┐
//!   │ formatter  │  filter to design (filter.rs) + attach Target
//!   └───────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ sampler   │  Splitter → train / val / test
//!   └──────────┘
//! ```

pub mod cv;
pub mod filter;
pub mod formatter;
pub mod loader;
pub mod model;
pub mod sampler;
