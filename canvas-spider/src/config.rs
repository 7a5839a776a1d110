use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use url::Url;

use crate::sync::paths::expand_with_home;

pub const DEFAULT_CONFIG_FILE: &str = "main.yaml";
const DEFAULT_CONCURRENT_DOWNLOADS: usize = 4;
const ENV_API_URL: &str = "CANVAS_API_URL";
const ENV_API_TOKEN: &str = "CANVAS_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no authentication information: set `authentication` or CANVAS_API_URL/CANVAS_API_TOKEN")]
    MissingAuthentication,
    #[error("invalid byte size: {0}")]
    InvalidByteSize(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Authentication {
    pub url: Url,
    pub token: String,
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMethod {
    #[default]
    #[value(name = "newFileOnly")]
    NewFileOnly,
    Overwrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Mute,
    #[default]
    Verbose,
    Vverbose,
}

/// A byte ceiling; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteLimit(pub Option<u64>);

impl ByteLimit {
    pub const UNLIMITED: ByteLimit = ByteLimit(None);

    pub fn bytes(self) -> Option<u64> {
        self.0
    }
}

impl FromStr for ByteLimit {
    type Err = ConfigError;

    /// Accepts `Infinity` or a number with an optional `b`/`kb`/`mb`/`gb`/`tb`
    /// unit (1024-based, case-insensitive).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim().to_ascii_lowercase();
        if text == "infinity" || text == "inf" {
            return Ok(ByteLimit::UNLIMITED);
        }
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let number: f64 = number
            .parse()
            .map_err(|_| ConfigError::InvalidByteSize(value.to_string()))?;
        let multiplier: u64 = match unit.trim() {
            "" | "b" => 1,
            "k" | "kb" => 1 << 10,
            "m" | "mb" => 1 << 20,
            "g" | "gb" => 1 << 30,
            "t" | "tb" => 1 << 40,
            _ => return Err(ConfigError::InvalidByteSize(value.to_string())),
        };
        let bytes = number * multiplier as f64;
        if !bytes.is_finite() || bytes < 0.0 {
            return Err(ConfigError::InvalidByteSize(value.to_string()));
        }
        Ok(ByteLimit(Some(bytes.round() as u64)))
    }
}

impl<'de> Deserialize<'de> for ByteLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Float(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(bytes) => Ok(ByteLimit(Some(bytes))),
            Raw::Float(bytes) if bytes.is_infinite() && bytes > 0.0 => Ok(ByteLimit::UNLIMITED),
            Raw::Float(bytes) if bytes.is_finite() && bytes >= 0.0 => {
                Ok(ByteLimit(Some(bytes.round() as u64)))
            }
            Raw::Float(bytes) => Err(serde::de::Error::custom(format!(
                "invalid byte size: {bytes}"
            ))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for ByteLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(bytes) => serializer.serialize_str(&format_bytes(bytes)),
            None => serializer.serialize_str("Infinity"),
        }
    }
}

/// Renders a byte count with the largest unit that keeps it exact-ish.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [("tb", 1 << 40), ("gb", 1 << 30), ("mb", 1 << 20), ("kb", 1 << 10)];
    for (unit, size) in UNITS {
        if bytes >= size {
            let value = bytes as f64 / size as f64;
            return if bytes % size == 0 {
                format!("{}{unit}", bytes / size)
            } else {
                format!("{value:.1}{unit}")
            };
        }
    }
    format!("{bytes}b")
}

/// Exact-filename and extension policy applied before the tree is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileFilter {
    pub file_white_list: Vec<String>,
    pub file_black_list: Vec<String>,
    pub file_extension_white_list: Vec<String>,
    pub file_extension_black_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseFilter {
    pub course_white_list: Vec<u64>,
    pub course_black_list: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub update: UpdateMethod,
    pub verbosity: Verbosity,
    pub max_file_size: ByteLimit,
    pub max_total_size: ByteLimit,
    pub max_concurrent_downloads: usize,
    #[serde(flatten)]
    pub courses: CourseFilter,
    #[serde(flatten)]
    pub files: FileFilter,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            update: UpdateMethod::default(),
            verbosity: Verbosity::default(),
            max_file_size: ByteLimit::UNLIMITED,
            max_total_size: ByteLimit::UNLIMITED,
            max_concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            courses: CourseFilter::default(),
            files: FileFilter::default(),
        }
    }
}

/// On-disk shape: everything is optional except what [`Config`] resolves.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
    #[serde(flatten)]
    pub settings: Settings,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub authentication: Authentication,
    pub settings: Settings,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if text.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(text)?
        };
        Self::resolve(file)
    }

    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let authentication = match file.authentication {
            Some(auth) => auth,
            None => authentication_from_env()?.ok_or(ConfigError::MissingAuthentication)?,
        };
        let mut settings = file.settings;
        if let Some(home) = dirs::home_dir() {
            settings.base_dir = expand_with_home(&settings.base_dir.to_string_lossy(), &home);
        }
        settings.max_concurrent_downloads = settings.max_concurrent_downloads.max(1);
        Ok(Self {
            authentication,
            settings,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_yaml(&content)
}

fn authentication_from_env() -> Result<Option<Authentication>, ConfigError> {
    let (Ok(url), Ok(token)) = (std::env::var(ENV_API_URL), std::env::var(ENV_API_TOKEN)) else {
        return Ok(None);
    };
    Ok(Some(Authentication {
        url: Url::parse(&url)?,
        token,
    }))
}

/// Renders a YAML configuration with placeholder credentials.
pub fn render_template(settings: Settings) -> Result<String, ConfigError> {
    let file = ConfigFile {
        authentication: Some(Authentication {
            url: Url::parse("https://canvas.instructure.com")?,
            token: "<canvas access token>".to_string(),
        }),
        settings,
    };
    Ok(serde_yaml::to_string(&file)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &str = "authentication:\n  url: https://canvas.example.edu\n  token: abc\n";

    #[test]
    fn parses_byte_sizes() {
        assert_eq!("500mb".parse::<ByteLimit>().unwrap(), ByteLimit(Some(500 << 20)));
        assert_eq!("20GB".parse::<ByteLimit>().unwrap(), ByteLimit(Some(20 << 30)));
        assert_eq!("1.5kb".parse::<ByteLimit>().unwrap(), ByteLimit(Some(1536)));
        assert_eq!("42".parse::<ByteLimit>().unwrap(), ByteLimit(Some(42)));
        assert_eq!("Infinity".parse::<ByteLimit>().unwrap(), ByteLimit::UNLIMITED);
        assert!(matches!(
            "ten mb".parse::<ByteLimit>(),
            Err(ConfigError::InvalidByteSize(_))
        ));
        assert!("5 parsecs".parse::<ByteLimit>().is_err());
    }

    #[test]
    fn formats_bytes_with_units() {
        assert_eq!(format_bytes(512), "512b");
        assert_eq!(format_bytes(500 << 20), "500mb");
        assert_eq!(format_bytes(1536), "1.5kb");
    }

    #[test]
    fn applies_defaults_for_missing_fields() {
        let config = Config::from_yaml(AUTH).unwrap();
        assert_eq!(config.authentication.token, "abc");
        assert_eq!(config.settings.base_dir, PathBuf::from("."));
        assert_eq!(config.settings.update, UpdateMethod::NewFileOnly);
        assert_eq!(config.settings.verbosity, Verbosity::Verbose);
        assert_eq!(config.settings.max_file_size, ByteLimit::UNLIMITED);
        assert_eq!(config.settings.max_concurrent_downloads, 4);
        assert!(config.settings.files.file_black_list.is_empty());
    }

    #[test]
    fn reads_lists_and_limits() {
        let yaml = format!(
            "{AUTH}baseDir: course\nupdate: overwrite\nverbosity: vverbose\n\
             maxFileSize: 100mb\nmaxTotalSize: 2048\nmaxConcurrentDownloads: 0\n\
             courseWhiteList: [7]\nfileWhiteList: [a.pdf]\nfileBlackList: [b.pdf]\n\
             fileExtensionWhiteList: [pdf]\nfileExtensionBlackList: [mp4]\n"
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let settings = config.settings;
        assert_eq!(settings.base_dir, PathBuf::from("course"));
        assert_eq!(settings.update, UpdateMethod::Overwrite);
        assert_eq!(settings.verbosity, Verbosity::Vverbose);
        assert_eq!(settings.max_file_size, ByteLimit(Some(100 << 20)));
        assert_eq!(settings.max_total_size, ByteLimit(Some(2048)));
        assert_eq!(settings.max_concurrent_downloads, 1);
        assert_eq!(settings.courses.course_white_list, vec![7]);
        assert_eq!(settings.files.file_white_list, vec!["a.pdf"]);
        assert_eq!(settings.files.file_extension_black_list, vec!["mp4"]);
    }

    #[test]
    fn missing_authentication_is_fatal() {
        if std::env::var(ENV_API_TOKEN).is_ok() {
            return;
        }
        assert!(matches!(
            Config::from_yaml("baseDir: course\n"),
            Err(ConfigError::MissingAuthentication)
        ));
    }

    #[test]
    fn rejects_bad_byte_size() {
        let yaml = format!("{AUTH}maxFileSize: lots\n");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn template_round_trips() {
        let settings = Settings {
            base_dir: PathBuf::from("course"),
            max_total_size: ByteLimit(Some(1 << 30)),
            ..Settings::default()
        };
        let text = render_template(settings).unwrap();
        assert!(text.contains("baseDir: course"));
        assert!(text.contains("maxTotalSize: 1gb"));

        let config = Config::from_yaml(&text).unwrap();
        assert_eq!(config.settings.max_total_size, ByteLimit(Some(1 << 30)));
        assert_eq!(config.settings.max_file_size, ByteLimit::UNLIMITED);
    }
}
