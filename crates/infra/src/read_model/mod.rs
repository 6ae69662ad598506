//! Disposable read models (query side).

pub mod parish_store;

pub use parish_store::{InMemoryParishStore, ParishStore};
