pub mod entry;
pub mod mapping;

pub use entry::{
    stamp_entries, CreateEntriesRequest, NewEntry, StampedEntry, TrackerEntry,
    MAX_ENTRIES_PER_REQUEST,
};
pub use mapping::{Account, FieldSpec, FileSample, MappableField, PartialMapping, NO_SELECTION};
