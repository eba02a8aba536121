//! Persistent storage for encrypted footprints
//!
//! A single SQLite file holds every footprint and the master salt. Tags are
//! handled as [`TagSet`] values everywhere except the column encoding.

mod record_store;
mod row;
mod tags;
mod types;

pub use record_store::RecordStore;
pub use tags::{validate_label, TagSet, RESERVED_CHARS, TAG_SEPARATOR};
pub use types::{
    end_of_day, format_timestamp, start_of_day, Footprint, FootprintQuery, FootprintSummary,
    GitStamp, MasterSalt, NewFootprint, StoreStats,
};
