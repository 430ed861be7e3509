//! Local installation tree access.

pub mod checksum;
pub mod cleanup;
pub mod paths;
pub mod platform;

pub use paths::InstallRoot;
pub use platform::Platform;
