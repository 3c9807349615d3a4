use std::path::PathBuf;

pub mod catalog;
pub mod settings;
pub mod workspace;

pub use catalog::ModelCatalog;
pub use settings::{Settings, SettingsPatch, SettingsState, Theme};
pub use workspace::{ChatWorkspace, SendOutcome, SkipReason, WorkspaceEvent};

/// Default on-disk database location, under the platform data directory.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quill")
        .join("chats.db")
}

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_database_path_lands_in_the_app_data_directory() {
        let path = default_database_path();
        assert!(path.ends_with(PathBuf::from("quill").join("chats.db")));
    }
}
