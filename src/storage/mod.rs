//! On-disk persistence for records.

pub mod entry;

pub use entry::EntryWriter;
