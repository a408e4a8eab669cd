//! Build-time metadata embedded by the build script.

/// The git commit hash at build time (short form), or `unknown`.
pub const GIT_HASH: &str = env!("PANBRIDGE_GIT_HASH");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("PANBRIDGE_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string reported by `/health` and `panctl --version`.
///
/// Example: `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
