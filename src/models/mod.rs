//! Data models for the image labelling service.
//!
//! - [`event`]: the storage notification that starts an invocation
//! - [`naming`]: names and scratch paths derived from the object key
//! - [`label`]: label annotations and the persisted image record

pub mod event;
pub mod label;
pub mod naming;
