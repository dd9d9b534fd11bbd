//! Error types for zensprite

use std::fmt;
use std::io;

/// Result type for zensprite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for zensprite operations
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid image dimensions
    BadDims {
        size_x: usize,
        size_y: usize,
        reason: &'static str,
    },
    /// Invalid encoder knobs
    BadParams {
        knob: &'static str,
        reason: &'static str,
    },
    /// Internal invariant violated (e.g. Huffman table construction failed
    /// on a nonempty alphabet); indicates a programmer error
    Bug(&'static str),
    /// Downstream sink failure while flushing the stream
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadDims { size_x, size_y, reason } => {
                write!(f, "Invalid dimensions {}x{}: {}", size_x, size_y, reason)
            }
            Error::BadParams { knob, reason } => {
                write!(f, "Invalid knob {}: {}", knob, reason)
            }
            Error::Bug(msg) => write!(f, "Internal encoder error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::BadDims { size_x: 0, size_y: 4, reason: "width is zero" };
        assert!(e.to_string().contains("0x4"));

        let e = Error::Bug("huffman build failed");
        assert!(e.to_string().contains("huffman"));
    }
}
