use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub media_dir: String,
    pub ffmpeg: Option<String>,
    pub silk_encoder: Option<String>,
    pub silk_decoder: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8437,
            database_url: "sqlite://./data/bridge.db".into(),
            media_dir: "./data/media".into(),
            ffmpeg: None,
            silk_encoder: None,
            silk_decoder: None,
        }
    }
}

pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_address") {
                settings.bind_address = v.clone();
            }
            if let Some(v) = file_cfg.get("port") {
                if let Ok(parsed) = v.parse::<u16>() {
                    settings.port = parsed;
                }
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
            if let Some(v) = file_cfg.get("media_dir") {
                settings.media_dir = v.clone();
            }
            if let Some(v) = file_cfg.get("ffmpeg") {
                settings.ffmpeg = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("silk_encoder") {
                settings.silk_encoder = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("silk_decoder") {
                settings.silk_decoder = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("APP__BIND_ADDRESS") {
        settings.bind_address = v;
    }
    if let Ok(v) = std::env::var("APP__PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.port = parsed;
        }
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__MEDIA_DIR") {
        settings.media_dir = v;
    }
    if let Ok(v) = std::env::var("APP__FFMPEG") {
        settings.ffmpeg = Some(v);
    }
    if let Ok(v) = std::env::var("APP__SILK_ENCODER") {
        settings.silk_encoder = Some(v);
    }
    if let Ok(v) = std::env::var("APP__SILK_DECODER") {
        settings.silk_decoder = Some(v);
    }

    settings
}

/// Accepts plain file paths as well as sqlite URLs; the storage layer takes
/// care of creating missing parent directories.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
    }

    #[test]
    fn keeps_existing_sqlite_urls_untouched() {
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url("sqlite://./bridge.db"),
            "sqlite://./bridge.db"
        );
    }

    #[test]
    fn empty_url_falls_back_to_the_default() {
        assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    }

    #[test]
    fn file_overrides_apply_on_top_of_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "bridge_config_test_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("bridge.toml");
        fs::write(&path, "port = \"9000\"\nffmpeg = \"/usr/bin/ffmpeg\"\n").expect("write");

        let settings = load_settings(&path);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.ffmpeg.as_deref(), Some("/usr/bin/ffmpeg"));
        assert_eq!(settings.bind_address, Settings::default().bind_address);

        fs::remove_dir_all(dir).expect("cleanup");
    }
}
