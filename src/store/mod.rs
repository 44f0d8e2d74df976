//! Settings persistence for credentials, profile, counters and the running flag.

pub mod json_file;
pub mod memory;
pub mod traits;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use traits::{Credentials, Settings, SettingsPatch, SettingsStore};
