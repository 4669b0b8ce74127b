pub mod deletion_index;
pub mod provenance;
pub mod record_store;

pub use deletion_index::DeletionIndex;
pub use provenance::ProvenanceTracker;
pub use record_store::RecordStore;
