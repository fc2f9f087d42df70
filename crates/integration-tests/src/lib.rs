//! Shared library code for integration tests
//!
//! Tests register themselves into [`INTEGRATION_TESTS`] and are collected by
//! the libtest-mimic harness in `main.rs`.

// Unfortunately needed here to work with linkme
#![allow(unsafe_code)]

use camino::Utf8Path;
use color_eyre::eyre::eyre;
use linkme::distributed_slice;

/// Environment variable naming the dvm binary under test
pub const DVM_PATH_ENV: &str = "DVM_PATH";

/// A test function that returns a Result
pub type TestFn = fn() -> color_eyre::Result<()>;

/// Metadata for a registered integration test
#[derive(Debug)]
pub struct IntegrationTest {
    /// Name of the integration test
    pub name: &'static str,
    /// Test function to execute
    pub f: TestFn,
}

impl IntegrationTest {
    /// Create a new integration test with the given name and function
    pub const fn new(name: &'static str, f: TestFn) -> Self {
        Self { name, f }
    }
}

/// Distributed slice holding all registered integration tests
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register an integration test with less boilerplate.
///
/// # Examples
///
/// ```ignore
/// fn test_list_classes() -> Result<()> {
///     let output = run_dvm(&["list-classes"])?;
///     output.assert_success("list-classes");
///     Ok(())
/// }
/// integration_test!(test_list_classes);
/// ```
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        ::paste::paste! {
            #[distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name);
        }
    };
}

/// Pick the dvm binary to run.
///
/// An explicit `DVM_PATH` wins. Otherwise a build found in `build_dirs` is
/// refused rather than used, since it may be stale; the user must point
/// `DVM_PATH` at it. Without either, `dvm` is looked up in `PATH`.
pub fn select_dvm_command(
    explicit: Option<String>,
    build_dirs: &[&Utf8Path],
) -> color_eyre::Result<String> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = build_dirs
        .iter()
        .map(|d| d.join("dvm"))
        .find(|p| p.exists())
    {
        return Err(eyre!(
            "Detected {path} - set {DVM_PATH_ENV}={path} to run using this binary"
        ));
    }
    Ok("dvm".to_owned())
}
