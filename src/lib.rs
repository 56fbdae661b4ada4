//! Agronomic spectral-data training pipeline.
//!
//! Measurements are loaded into [`data::model::StructuredData`], narrowed to
//! the experimental design and given a target by a formatter, split into
//! train / val / test by a splitter, then fitted and evaluated. Every
//! swappable stage is chosen by name through [`registry`].

pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod registry;
