//! Service layer: the ingest pipeline and the collaborators it drives.

pub mod credentials;
pub mod document_store;
pub mod ingest_service;
pub mod label_detector;
pub mod object_store;

#[cfg(test)]
pub mod testing;
