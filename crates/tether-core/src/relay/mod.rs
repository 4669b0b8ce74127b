pub mod directory;
pub mod selection;

pub use directory::RelayDirectory;
pub use selection::RelaySelector;
