use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use loader::error::LoadError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for the binary.
pub type TargetResult<T> = Result<T, TargetError>;

/// Captured backtrace of a non loader error.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the binary.
///
/// Wraps [`LoadError`] for failures of the load itself and adds the failures of the process
/// setup around it.
#[derive(Debug)]
pub enum TargetError {
    Load(LoadError),
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl TargetError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            TargetError::Load(_) => "load error",
            TargetError::Config(_, _) => "configuration error",
            TargetError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            TargetError::Load(err) => err.backtrace(),
            TargetError::Config(_, backtrace) | TargetError::Io(_, backtrace) => Some(&backtrace.0),
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        TargetError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("target-redshift failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        if let TargetError::Load(err) = self {
            out.push_str(&format!("kinds: {:?}\n", err.kinds()));
        }

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::Load(err) => write!(f, "{err}"),
            TargetError::Config(source, _) => write!(f, "configuration error: {source}"),
            TargetError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for TargetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TargetError::Load(err) => err.source(),
            TargetError::Config(source, _) => Some(source.as_ref()),
            TargetError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for TargetError {
    fn from(err: std::io::Error) -> Self {
        TargetError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<LoadError> for TargetError {
    fn from(err: LoadError) -> Self {
        TargetError::Load(err)
    }
}
