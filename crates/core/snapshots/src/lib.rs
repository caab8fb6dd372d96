//! Snapshot acquisition for geodata providers.
//!
//! A [`Snapshot`] is one provider's current dataset state for a single
//! layer, fetched fresh on every run. This crate covers everything up to
//! the point where decoded rows are handed to the persistence core:
//! the snapshot data model, the [`Loader`] capability interface and its
//! provider registry, OAuth2 session acquisition, and remote archive
//! download/extraction.
//!
//! Decoding provider file formats into rows is delegated behind the
//! [`LayerDecoder`] trait; this crate never links a geospatial I/O
//! library itself.

pub mod loader;
pub mod progress;
pub mod remote_zip;
pub mod session;
mod snapshot;
pub mod stac;

pub use self::{
    loader::{LoadError, Loader, LoaderRegistry, StacLoader, SvarLoader},
    progress::{LogProgress, NoProgress, ProgressSink},
    remote_zip::{BoxError, FetchArchiveError, LayerDecoder},
    session::{AuthError, Session},
    snapshot::{Column, ColumnType, LoadResult, Snapshot, Value},
};
