// Configuration versions
// Data model, store seam, and resolution of the version that answers a call

mod resolver;
mod store;
mod types;

pub use resolver::{parse_pinned_version, VersionResolver};
pub use store::{InMemoryVersionStore, VersionStore};
pub use types::{
    parse_version_number, ConfigurationVersion, Deprecation, Environment, ExecutionSettings,
    ResolvedVersion, SunsetPolicy, VersionStatus,
};
