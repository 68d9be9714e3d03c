//! Driver error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::xu::{TransferError, XuError};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by device identification, open and capture operations.
///
/// Identification keeps two distinct signals: a node that is simply not one
/// of our cameras ([`Error::NotOurDevice`]) and a camera whose firmware
/// generation this driver does not speak ([`Error::UnsupportedFirmware`]).
/// Scanning continues past the former silently and warns on the latter.
#[derive(Debug, Error)]
pub enum Error {
    #[error("device is not a recognized stereo camera")]
    NotOurDevice,

    #[error("camera firmware is not supported, please update it")]
    UnsupportedFirmware,

    #[error("no supported stereo camera found")]
    NoDevice,

    #[error("cannot identify '{path}': {source}")]
    Identify { path: PathBuf, source: io::Error },

    #[error("'{path}' is not a character device")]
    NotCharDevice { path: PathBuf },

    #[error("cannot open '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot query capabilities of '{path}': {source}")]
    QueryCaps { path: PathBuf, source: io::Error },

    #[error("'{path}' does not support streaming video capture")]
    NotACaptureDevice { path: PathBuf },

    #[error("cannot set pixel format of '{path}': {source}")]
    SetFormat { path: PathBuf, source: io::Error },

    #[error("granted resolution {granted_width}x{granted_height} differs from requested {requested_width}x{requested_height}")]
    FormatMismatch {
        requested_width: u32,
        requested_height: u32,
        granted_width: u32,
        granted_height: u32,
    },

    #[error("cannot request capture buffers: {0}")]
    RequestBuffers(io::Error),

    #[error("cannot query capture buffer {index}: {source}")]
    QueryBuffer { index: u32, source: io::Error },

    #[error("cannot map capture buffer {index}: {source}")]
    MapBuffer { index: u32, source: io::Error },

    #[error("cannot queue capture buffer {index}: {source}")]
    QueueBuffer { index: u32, source: io::Error },

    #[error("cannot start streaming: {0}")]
    StreamOn(io::Error),

    #[error(transparent)]
    Xu(#[from] XuError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
