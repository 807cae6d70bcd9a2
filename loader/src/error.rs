//! Error types and result definitions for loader operations.
//!
//! Every failure the loader can hit is classified by an [`ErrorKind`]. A [`LoadError`] either
//! carries a single classified failure, with call-site location and backtrace captured at
//! construction, or aggregates many of them when several concurrent stream flushes fail at once.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for loader operations using [`LoadError`] as the error type.
pub type LoadResult<T> = Result<T, LoadError>;

/// Detailed payload stored for single [`LoadError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for loader operations.
#[derive(Debug, Clone)]
pub struct LoadError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures of several concurrent flush tasks.
    Many {
        errors: Vec<LoadError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures surfaced by the loader.
///
/// Every category is fatal for the run; the kind only drives reporting.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Input protocol errors
    MessageParseFailed,
    MissingMessageField,
    UnknownMessageType,
    UnknownStream,
    MissingKeyProperties,
    PrimaryKeyRequired,
    MissingPrimaryKeyValue,

    // Validation errors
    RecordValidationFailed,
    UnsupportedValidation,
    InvalidJsonSchema,

    // Configuration errors
    ConfigError,
    TargetSchemaMissing,

    // Schema errors
    SchemaConflict,

    // Warehouse and storage errors
    WarehouseConnectionFailed,
    WarehouseQueryFailed,
    GrantFailed,
    StorageUploadFailed,
    StorageDeleteFailed,

    // IO & serialization errors
    IoError,
    SerializationError,

    // State & workflow errors
    FlushTaskPanic,
    InvalidState,

    Unknown,
}

impl LoadError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { ref errors, .. } => errors.first().and_then(|e| e.description()),
        }
    }

    /// Returns the dynamic detail if available.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for single errors.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        LoadError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        LoadError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &LoadError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for LoadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the detail block indented below the headline.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

/// Creates a [`LoadError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for LoadError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> LoadError {
        LoadError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`LoadError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for LoadError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> LoadError {
        LoadError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for LoadError
where
    E: Into<LoadError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> LoadError {
        let location = Location::caller();

        let mut errors: Vec<LoadError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        LoadError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for LoadError {
    #[track_caller]
    fn from(err: std::io::Error) -> LoadError {
        LoadError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for LoadError {
    #[track_caller]
    fn from(err: serde_json::Error) -> LoadError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
        };

        LoadError::from_source(kind, description, err)
    }
}

/// Maps warehouse driver errors by SQLSTATE class.
impl From<tokio_postgres::Error> for LoadError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> LoadError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::TOO_MANY_CONNECTIONS => (
                    ErrorKind::WarehouseConnectionFailed,
                    "Warehouse connection failed",
                ),
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::WarehouseConnectionFailed,
                    "Warehouse authentication failed",
                ),
                SqlState::UNDEFINED_OBJECT | SqlState::INSUFFICIENT_PRIVILEGE => (
                    ErrorKind::WarehouseQueryFailed,
                    "Warehouse object missing or access denied",
                ),
                _ => (ErrorKind::WarehouseQueryFailed, "Warehouse query failed"),
            },
            None => (
                ErrorKind::WarehouseConnectionFailed,
                "Warehouse connection failed",
            ),
        };

        LoadError::from_source(kind, description, err)
    }
}

impl From<object_store::Error> for LoadError {
    #[track_caller]
    fn from(err: object_store::Error) -> LoadError {
        LoadError::from_source(
            ErrorKind::StorageUploadFailed,
            "Object storage operation failed",
            err,
        )
    }
}

impl From<rustls::Error> for LoadError {
    #[track_caller]
    fn from(err: rustls::Error) -> LoadError {
        LoadError::from_source(ErrorKind::ConfigError, "TLS configuration failed", err)
    }
}

impl From<chrono::ParseError> for LoadError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> LoadError {
        LoadError::from_source(ErrorKind::SerializationError, "Datetime parsing failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, load_error};

    fn failing(kind: ErrorKind) -> LoadResult<()> {
        bail!(kind, "operation failed", "with some detail");
    }

    #[test]
    fn test_single_error_display_contains_kind_and_detail() {
        let err = load_error!(ErrorKind::UnknownStream, "Stream not found", "users");
        let rendered = err.to_string();

        assert!(rendered.starts_with("[UnknownStream] Stream not found @ "));
        assert!(rendered.contains("Detail:\n    users"));
        assert_eq!(err.detail(), Some("users"));
    }

    #[test]
    fn test_bail_returns_error() {
        let err = failing(ErrorKind::SchemaConflict).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaConflict);
        assert_eq!(err.description(), Some("operation failed"));
    }

    #[test]
    fn test_aggregate_of_one_is_unwrapped() {
        let err = LoadError::from(vec![load_error!(ErrorKind::IoError, "io")]);

        assert_eq!(err.kinds(), vec![ErrorKind::IoError]);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn test_aggregate_lists_every_error() {
        let err = LoadError::from(vec![
            load_error!(ErrorKind::WarehouseQueryFailed, "first"),
            load_error!(ErrorKind::StorageUploadFailed, "second"),
        ]);

        assert_eq!(err.kind(), ErrorKind::WarehouseQueryFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::WarehouseQueryFailed, ErrorKind::StorageUploadFailed]
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("1. [WarehouseQueryFailed] first"));
        assert!(rendered.contains("2. [StorageUploadFailed] second"));
    }

    #[test]
    fn test_source_is_exposed() {
        let io = std::io::Error::other("disk on fire");
        let err = load_error!(ErrorKind::IoError, "write failed", source: io);

        let source = error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk on fire");
    }
}
