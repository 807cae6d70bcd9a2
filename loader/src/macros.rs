//! Error construction shorthands.

/// Builds a [`crate::error::LoadError`].
///
/// Forms, each optionally followed by `, source: err`:
/// - `load_error!(kind, "description")`
/// - `load_error!(kind, "description", detail = owned_string)`
/// - `load_error!(kind, "description", value)`, where `value` is turned into the detail with
///   `to_string()`
#[macro_export]
macro_rules! load_error {
    ($kind:expr, $desc:expr $(, source: $source:expr)?) => {
        $crate::error::LoadError::from(($kind, $desc)) $(.with_source($source))?
    };
    ($kind:expr, $desc:expr, detail = $detail:expr $(, source: $source:expr)?) => {
        $crate::error::LoadError::from(($kind, $desc, $detail)) $(.with_source($source))?
    };
    ($kind:expr, $desc:expr, $detail:expr $(, source: $source:expr)?) => {
        $crate::error::LoadError::from(($kind, $desc, $detail.to_string()))
            $(.with_source($source))?
    };
}

/// Returns early with the [`crate::error::LoadError`] that [`load_error!`] builds from the same
/// arguments.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::load_error!($($args)+))
    };
}
