use camino::Utf8PathBuf;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(config::not_found),
        help("Check the --config path, or omit it to use pacmerge.toml next to the executable")
    )]
    ConfigNotFound { path: Utf8PathBuf },

    #[error("Configuration file error")]
    #[diagnostic(
        code(config::parse_error),
        help("Check your pacmerge.toml file for syntax errors")
    )]
    ConfigParseError {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        #[label("error occurred here")]
        span: Option<SourceSpan>,
    },

    #[error("Unknown configuration key: {key}")]
    #[diagnostic(
        code(config::unknown_key),
        help("Run 'pacmerge config show' to list the available keys")
    )]
    UnknownConfigKey { key: String },

    #[error("Invalid value for {key}: {value}")]
    #[diagnostic(code(config::invalid_value), help("{expected}"))]
    InvalidConfigValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("Setting '{key}' is not configured")]
    #[diagnostic(
        code(config::missing_setting),
        help("Run 'pacmerge config set {key} <value>'")
    )]
    SettingMissing { key: &'static str },

    #[error("Mods folder not found: {path}")]
    #[diagnostic(
        code(mods::root_missing),
        help("Point mods_root at the folder holding your installed mods, or pass --mod for each mod directory")
    )]
    ModsRootMissing { path: Utf8PathBuf },

    #[error("Mod directory not found: {path}")]
    #[diagnostic(
        code(mods::dir_missing),
        help("Make sure the directory exists and the path is correct")
    )]
    ModDirMissing { path: Utf8PathBuf },

    #[error("Archive tool is not configured: '{program}'")]
    #[diagnostic(
        code(codec::not_configured),
        help("Run 'pacmerge config set codec.program <path to the archive tool>'")
    )]
    CodecNotConfigured { program: String },

    #[error("Path manifest could not be read: {path}")]
    #[diagnostic(
        code(catalog::manifest_unreadable),
        help("Run 'pacmerge config set manifest_path <path to the manifest>'")
    )]
    ManifestUnreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Merge failed")]
    #[diagnostic(code(merge::failed))]
    Merge {
        #[source]
        source: pac_merge::Error,
    },

    #[error("IO operation failed")]
    #[diagnostic(code(io::operation_failed))]
    IoError {
        #[from]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_not_found(path: Utf8PathBuf) -> Self {
        Self::ConfigNotFound { path }
    }

    pub fn config_parse_error(
        source: Box<dyn std::error::Error + Send + Sync>,
        span: Option<SourceSpan>,
    ) -> Self {
        Self::ConfigParseError { source, span }
    }

    pub fn invalid_config_value(key: &str, value: &str, expected: &'static str) -> Self {
        Self::InvalidConfigValue {
            key: key.to_string(),
            value: value.to_string(),
            expected,
        }
    }

    pub fn setting_missing(key: &'static str) -> Self {
        Self::SettingMissing { key }
    }
}

impl From<pac_merge::Error> for CliError {
    fn from(error: pac_merge::Error) -> Self {
        match error {
            pac_merge::Error::ManifestUnreadable { path, source } => {
                Self::ManifestUnreadable { path, source }
            }
            source => Self::Merge { source },
        }
    }
}
