use std::fmt;

#[derive(Debug)]
pub enum ExportError {
    /// The header asset could not be loaded or decoded. Recoverable at the
    /// orchestration level: the header renders without a logo.
    Asset(String),
    /// A page failed to rasterize. Fatal: the export aborts and no partial
    /// document is returned.
    Raster(String),
    /// The PDF container could not be encoded or serialized.
    Pdf(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Asset(message) => write!(f, "asset error: {}", message),
            ExportError::Raster(message) => write!(f, "rasterization failed: {}", message),
            ExportError::Pdf(message) => write!(f, "pdf write failed: {}", message),
            ExportError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ExportError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        ExportError::Io(value)
    }
}
