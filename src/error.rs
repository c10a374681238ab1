use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum DocGenError {
    TemplateNotFound(PathBuf),
    InvalidTemplate(String),
    StampRenderFailure(String),
    ConversionFailure(String),
    OverlayGeometryMismatch { page_index: usize, message: String },
    BundleAssemblyFailure(String),
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl fmt::Display for DocGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocGenError::TemplateNotFound(path) => {
                write!(f, "template not found: {}", path.display())
            }
            DocGenError::InvalidTemplate(message) => write!(f, "invalid template: {}", message),
            DocGenError::StampRenderFailure(message) => {
                write!(f, "signature stamp rendering failed: {}", message)
            }
            DocGenError::ConversionFailure(message) => {
                write!(f, "document conversion failed: {}", message)
            }
            DocGenError::OverlayGeometryMismatch {
                page_index,
                message,
            } => write!(
                f,
                "overlay geometry mismatch on page {}: {}",
                page_index + 1,
                message
            ),
            DocGenError::BundleAssemblyFailure(message) => {
                write!(f, "bundle assembly failed: {}", message)
            }
            DocGenError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            DocGenError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for DocGenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DocGenError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DocGenError {
    fn from(value: std::io::Error) -> Self {
        DocGenError::Io(value)
    }
}

impl From<zip::result::ZipError> for DocGenError {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(err) => DocGenError::Io(err),
            other => DocGenError::InvalidTemplate(format!("zip container: {other}")),
        }
    }
}

impl From<lopdf::Error> for DocGenError {
    fn from(value: lopdf::Error) -> Self {
        DocGenError::InvalidTemplate(format!("pdf: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    ConversionFailed,
    OverlayGeometryMismatch,
    FontFallback,
    MappingPageIgnored,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::ConversionFailed => "CONVERSION_FAILED",
            WarningCode::OverlayGeometryMismatch => "OVERLAY_GEOMETRY_MISMATCH",
            WarningCode::FontFallback => "FONT_FALLBACK",
            WarningCode::MappingPageIgnored => "MAPPING_PAGE_IGNORED",
        }
    }
}

// Non-fatal condition reported next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationWarning {
    pub code: WarningCode,
    pub message: String,
}

impl GenerationWarning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for GenerationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}
