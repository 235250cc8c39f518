//! Common utilities shared by the library and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Last dot-separated segment of a fully qualified class name
///
/// `"Foo.Bar.BazTests"` becomes `"BazTests"`. Rust module paths
/// (`foo::bar::baz_tests`) are accepted too. Empty segments are skipped.
pub fn short_class_name(qualified: &str) -> &str {
    qualified
        .rsplit(&['.', ':'][..])
        .find(|segment| !segment.is_empty())
        .unwrap_or(qualified)
}
