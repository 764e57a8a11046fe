//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;
use std::num;
use std::str;
use std::string;

/// Customized error type for ChainKV.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChainKvError(pub String);

impl ChainKvError {
    /// Creates an error out of anything displayable.
    pub fn msg(msg: impl fmt::Display) -> Self {
        ChainKvError(msg.to_string())
    }
}

impl fmt::Display for ChainKvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for ChainKvError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ChainKvError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ChainKvError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ChainKvError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(num::ParseIntError);
impl_from_error!(str::Utf8Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(serde_json::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::sync::AcquireError);
impl_from_error!(tokio::task::JoinError);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ChainKvError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ChainKvError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_parse_error() {
        let parse_error = "not-a-number".parse::<u64>().unwrap_err();
        let e = ChainKvError::from(parse_error);
        assert!(!e.0.is_empty());
    }
}
