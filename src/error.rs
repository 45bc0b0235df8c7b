use std::fmt;

#[derive(Debug)]
pub enum InlinerError {
    MalformedDocument(String),
    /// The document is not well-formed XML.
    Xml(roxmltree::Error),
    Css {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
    },
    ExternalStylesheet {
        location: String,
        reason: String,
    },
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl InlinerError {
    pub(crate) fn external(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        InlinerError::ExternalStylesheet {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, InlinerError::ExternalStylesheet { .. })
    }
}

impl fmt::Display for InlinerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlinerError::MalformedDocument(message) => {
                write!(f, "could not parse the html: {}", message)
            }
            InlinerError::Xml(err) => write!(f, "could not parse the xml: {}", err),
            InlinerError::Css {
                message,
                line,
                column,
            } => match (line, column) {
                (Some(line), Some(column)) => {
                    write!(f, "invalid css at line {}, column {}: {}", line, column, message)
                }
                (Some(line), None) => write!(f, "invalid css at line {}: {}", line, message),
                _ => write!(f, "invalid css: {}", message),
            },
            InlinerError::ExternalStylesheet { location, reason } => {
                write!(f, "external stylesheet {} not loaded: {}", location, reason)
            }
            InlinerError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            InlinerError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for InlinerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InlinerError::Io(err) => Some(err),
            InlinerError::Xml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for InlinerError {
    fn from(value: std::io::Error) -> Self {
        InlinerError::Io(value)
    }
}
