use std::fmt;

use crate::engine::loader::FetchError;

#[derive(Debug)]
pub enum RetrocssError {
    /// `cssRules` read on a stylesheet the page may not inspect.
    AccessDenied { href: String },
    Fetch(FetchError),
    InvalidUrl(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for RetrocssError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrocssError::AccessDenied { href } => {
                write!(f, "access to cssRules denied for {}", href)
            }
            RetrocssError::Fetch(err) => write!(f, "fetch failed: {}", err),
            RetrocssError::InvalidUrl(message) => write!(f, "invalid url: {}", message),
            RetrocssError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            RetrocssError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for RetrocssError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetrocssError::Io(err) => Some(err),
            RetrocssError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RetrocssError {
    fn from(value: std::io::Error) -> Self {
        RetrocssError::Io(value)
    }
}

impl From<FetchError> for RetrocssError {
    fn from(value: FetchError) -> Self {
        RetrocssError::Fetch(value)
    }
}

impl From<url::ParseError> for RetrocssError {
    fn from(value: url::ParseError) -> Self {
        RetrocssError::InvalidUrl(value.to_string())
    }
}
