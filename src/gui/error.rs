use std::{error::Error, fmt::Display, io};

#[derive(Debug)]
pub enum GuiError {
    IOError(io::Error),
    /// There was nothing to choose from.
    NoDevices,
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuiError::IOError(e) => write!(f, "terminal error: {}", e),
            GuiError::NoDevices => write!(f, "no serial devices found"),
        }
    }
}

impl Error for GuiError {}

impl From<io::Error> for GuiError {
    fn from(value: io::Error) -> Self {
        Self::IOError(value)
    }
}
