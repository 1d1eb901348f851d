use std::io;

use thiserror::Error;

/// Failure reported by a [`Controller`](crate::Controller) query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Nothing answers at the queried address.
    #[error("no such device")]
    NoDevice,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} not supported by this controller")]
    Unsupported(&'static str),

    #[error("invalid response: {0}")]
    Invalid(String),
}

/// Errors raised while reporting on a single device address.
#[derive(Debug, Error)]
pub enum Error {
    #[error("addr {addr}: no such device")]
    DeviceAbsent { addr: u8 },

    #[error("addr {addr}: {source}")]
    QueryFailed {
        addr: u8,
        #[source]
        source: QueryError,
    },

    /// Zero-length or out-of-bounds record inside a descriptor buffer.
    #[error("malformed descriptor at offset {offset}")]
    MalformedDescriptor { offset: usize },

    #[error("cannot allocate {size} byte descriptor buffer")]
    AllocationFailed { size: usize },

    /// Writing the report failed; this one ends the whole run.
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Tags a collaborator failure with the address it was raised for.
    pub fn query(addr: u8, err: QueryError) -> Self {
        match err {
            QueryError::NoDevice => Error::DeviceAbsent { addr },
            source => Error::QueryFailed { addr, source },
        }
    }

    /// Only output failures abort a scan; everything else is per address.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_device_becomes_device_absent() {
        let err = Error::query(5, QueryError::NoDevice);
        assert!(matches!(err, Error::DeviceAbsent { addr: 5 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn other_failures_keep_address_and_cause() {
        let err = Error::query(9, QueryError::Invalid("short read".into()));
        assert_eq!(err.to_string(), "addr 9: invalid response: short read");
    }

    #[test]
    fn output_errors_are_fatal() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert!(err.is_fatal());
    }
}
