//! Device-side MTP (PIMA 15740 / MTP 1.1) responder.
//!
//! The crate is organized around three layers: a binary container codec
//! ([`container`], [`data`], [`datasets`]), a handle-addressed storage
//! abstraction ([`storage`]) and the transaction engine ([`responder`])
//! that binds them to a USB FunctionFS transport ([`transport`]).

use num_derive::FromPrimitive;
use serde::Serialize;
use thiserror::Error as ThisError;

use std::io;

pub mod command;
pub mod config;
pub mod container;
pub mod data;
pub mod datasets;
pub mod deviceinfo;
pub mod event;
pub mod extension;
pub mod format;
pub mod propcache;
pub mod properties;
pub mod response;
pub mod responder;
pub mod storage;
pub mod transport;

pub use crate::command::*;
pub use crate::container::*;
pub use crate::data::*;
pub use crate::datasets::*;
pub use crate::event::*;
pub use crate::format::*;
pub use crate::response::*;

/// A 32-bit object handle, unique across all storages for the lifetime
/// of the process. 0 and 0xFFFFFFFF are reserved.
pub type ObjHandle = u32;

/// A 32-bit storage id: `(storage_number << 16) | partition_number`.
pub type StorageId = u32;

/// Handle wildcard: "all objects" in DeleteObject and GetNumObjects.
pub const OBJ_HANDLE_ALL: ObjHandle = 0xFFFF_FFFF;

/// Parent-handle wildcard in GetObjectHandles/GetNumObjects: objects at
/// the root level of the storage.
pub const OBJ_HANDLE_ROOT_LEVEL: ObjHandle = 0xFFFF_FFFF;

/// Parent value stored in ObjectInfo for objects at the storage root.
pub const PARENT_ROOT: ObjHandle = 0;

/// Storage-id wildcard addressing every storage.
pub const STORAGE_ID_ALL: StorageId = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
#[repr(u16)]
pub enum ContainerType {
    Command = 1,
    Data = 2,
    Response = 3,
    Event = 4,
}

/// Crate-level error. Storage and handler failures that map onto an MTP
/// response code travel as `Response`; everything else degrades to
/// `GeneralError` at the protocol boundary.
#[derive(ThisError, Debug)]
pub enum Error {
    /// A failure with a defined MTP response code
    #[error("mtp response code {0:?}")]
    Response(StandardResponseCode),

    /// A container that cannot be decoded (truncated payload, bad
    /// header, invalid UTF-16)
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// A dataset field with an unknown data-type code
    #[error("unsupported data type code {0:#06x}")]
    UnsupportedType(u16),

    #[error("malformed container: bad object format")]
    BadObjectFormat,

    #[error("malformed container: bad event code")]
    BadEventCode,

    /// Transport-level failure (endpoint gone, descriptor write failed)
    #[error("transport error: {0}")]
    Transport(String),

    /// Another IO error
    #[error("an i/o error occurred: {0}")]
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        // A short read while decoding is a truncated payload, not an
        // I/O failure of the device.
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::MalformedContainer("truncated payload".into())
        } else {
            Error::Io(err)
        }
    }
}

impl From<StandardResponseCode> for Error {
    fn from(code: StandardResponseCode) -> Error {
        Error::Response(code)
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Error {
        Error::Io(io::Error::from_raw_os_error(err as i32))
    }
}

impl Error {
    /// The response code to report for this error.
    pub fn response_code(&self) -> StandardResponseCode {
        match self {
            Error::Response(code) => *code,
            Error::MalformedContainer(_) | Error::UnsupportedType(_) | Error::BadObjectFormat => {
                StandardResponseCode::InvalidDataset
            }
            _ => StandardResponseCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_maps_to_malformed_container() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, Error::MalformedContainer(_)));
    }

    #[test]
    fn response_codes_pass_through() {
        let err = Error::from(StandardResponseCode::InvalidObjectHandle);
        assert_eq!(
            err.response_code(),
            StandardResponseCode::InvalidObjectHandle
        );
        let io_err = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "x"));
        assert_eq!(io_err.response_code(), StandardResponseCode::GeneralError);
    }
}
