use std::path::PathBuf;

/// Errors that end a run before or instead of reconciling.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("failed to read fleet file {}: {}", .path.display(), .source)]
    FleetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet file {}: {}", .path.display(), .source)]
    FleetParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("infra error: {0}")]
    Infra(#[from] vf_infra::Error),
}
