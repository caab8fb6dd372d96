//! Remote archive acquisition.
//!
//! Providers publish each asset as a single zip archive containing one
//! payload file with one or more layers. This module downloads the
//! archive into a temporary directory, extracts it, locates the payload
//! and hands it to a [`LayerDecoder`]. The temporary directory is
//! removed when the returned snapshots have been built.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{Session, Snapshot};

/// Opaque decoder failure. Decoders are external; their error types are not.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Decodes an extracted payload file into per-layer snapshots.
///
/// This is the seam to the external geospatial I/O capability: the
/// implementation owns format detection, attribute typing, geometry
/// encoding (WKB) and identity-column selection per layer.
pub trait LayerDecoder: Send + Sync {
    fn decode_layers(&self, payload: &Path) -> Result<BTreeMap<String, Snapshot>, BoxError>;
}

/// Errors that occur while fetching and unpacking a remote archive.
#[derive(Debug, thiserror::Error)]
pub enum FetchArchiveError {
    /// The download request failed or returned an error status.
    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Local filesystem I/O failed while landing or extracting the archive.
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive is not a readable zip file.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive contained no payload file after extraction.
    #[error("archive from {url} contained no payload file")]
    EmptyArchive { url: String },

    /// The decoder rejected the payload.
    #[error("layer decoding failed: {0}")]
    Decode(#[source] BoxError),
}

/// Downloads `url` with the given session, extracts the zip and decodes
/// every contained layer.
#[tracing::instrument(skip(session, decoder), err)]
pub async fn load_remote_zip(
    url: &str,
    session: &Session,
    decoder: &dyn LayerDecoder,
) -> Result<BTreeMap<String, Snapshot>, FetchArchiveError> {
    let dir = tempfile::tempdir()?;
    let payload = fetch_archive(url, session, dir.path()).await?;

    tracing::info!(payload = %payload.display(), "decoding layers");
    decoder
        .decode_layers(&payload)
        .map_err(FetchArchiveError::Decode)
}

/// Downloads a single unarchived payload (e.g. a WFS GeoJSON export)
/// and decodes it. The payload lands as `{name}` in a temporary
/// directory, so decoders that derive layer names from the file stem
/// see a meaningful name.
#[tracing::instrument(skip(session, decoder), err)]
pub async fn load_remote_file(
    url: &str,
    name: &str,
    session: &Session,
    decoder: &dyn LayerDecoder,
) -> Result<BTreeMap<String, Snapshot>, FetchArchiveError> {
    let dir = tempfile::tempdir()?;
    let payload = dir.path().join(name);
    download(url, session, &payload).await?;

    tracing::info!(payload = %payload.display(), "decoding layers");
    decoder
        .decode_layers(&payload)
        .map_err(FetchArchiveError::Decode)
}

/// Downloads and extracts the archive at `url` into `dir`, returning the
/// path of the extracted payload file.
async fn fetch_archive(
    url: &str,
    session: &Session,
    dir: &Path,
) -> Result<PathBuf, FetchArchiveError> {
    let zip_path = dir.join("data.zip");
    download(url, session, &zip_path).await?;

    tracing::info!("extracting archive");
    let extract_dir = dir.to_path_buf();
    let archive_path = zip_path.clone();
    tokio::task::spawn_blocking(move || -> Result<(), FetchArchiveError> {
        let file = std::fs::File::open(&archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&extract_dir)?;
        Ok(())
    })
    .await
    .map_err(|join_err| FetchArchiveError::Io(io::Error::other(join_err)))??;

    // The payload is whatever single file the archive contained.
    payload_file(dir, &zip_path)?.ok_or_else(|| FetchArchiveError::EmptyArchive {
        url: url.to_owned(),
    })
}

/// Streams the response body at `url` into `path`.
async fn download(url: &str, session: &Session, path: &Path) -> Result<(), FetchArchiveError> {
    tracing::info!(url, "downloading");

    let response = session
        .client()
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|source| FetchArchiveError::Download {
            url: url.to_owned(),
            source,
        })?;

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| FetchArchiveError::Download {
            url: url.to_owned(),
            source,
        })?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(())
}

fn payload_file(dir: &Path, archive: &Path) -> Result<Option<PathBuf>, io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path != archive {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
