use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:9100";

/// Конфигурация xpost, хранится в JSON файле
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Учётные данные X (OAuth1 и/или OAuth2)
    #[serde(rename = "x", alias = "credentials", default)]
    pub credentials: CredentialConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub addr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Токен, которым защищён HTTP endpoint
    #[serde(default)]
    pub api_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_client_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_redirect_uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub oauth2_scope: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_refresh_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oauth2_token_type: String,
    /// Unix время истечения access token, 0 если неизвестно
    #[serde(default, skip_serializing_if = "is_zero")]
    pub oauth2_expires_at: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Config {
    pub fn with_defaults() -> Self {
        Config {
            server: ServerConfig {
                addr: DEFAULT_SERVER_ADDR.to_string(),
            },
            ..Config::default()
        }
    }
}

/// Путь к конфигу по умолчанию: ~/.config/xpost/config.json
pub fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".config").join("xpost").join("config.json"),
        None => PathBuf::from("config.json"),
    }
}

/// Загружает конфиг или создаёт новый при первом запуске.
///
/// Возвращает `(config, first_boot)`. Пустые обязательные поля (адрес,
/// api token) заполняются значениями по умолчанию и сохраняются один раз.
pub fn load_or_init(path: &Path) -> AppResult<(Config, bool)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| AppError::ConfigIo {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut cfg = Config::with_defaults();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            cfg.security.api_token = generate_token();
            save(path, &cfg)?;
            info!("Initialized new config at {}", path.display());
            return Ok((cfg, true));
        }
        Err(source) => {
            return Err(AppError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !content.trim().is_empty() {
        cfg = serde_json::from_str(&content).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let mut changed = false;
    if cfg.server.addr.trim().is_empty() {
        cfg.server.addr = DEFAULT_SERVER_ADDR.to_string();
        changed = true;
    }
    if cfg.security.api_token.trim().is_empty() {
        cfg.security.api_token = generate_token();
        changed = true;
    }

    if changed {
        debug!("Backfilling missing config fields in {}", path.display());
        save(path, &cfg)?;
    }

    Ok((cfg, false))
}

/// Атомарно сохраняет конфиг: пишет во временный файл и переименовывает
pub fn save(path: &Path, cfg: &Config) -> AppResult<()> {
    let data = serde_json::to_vec_pretty(cfg)?;

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    write_private(&tmp_path, &data).map_err(|source| AppError::ConfigIo {
        path: tmp_path.clone(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| AppError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Применяет переопределения из переменных окружения
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_with(cfg, |name| std::env::var(name).ok());
}

/// Применяет переопределения из произвольного источника.
///
/// Пустые значения игнорируются. Нечисловой `X_OAUTH2_EXPIRES_AT` молча
/// пропускается.
pub fn apply_overrides_with<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = get("XPOST_ADDR") {
        cfg.server.addr = v;
    }
    if let Some(v) = get("XPOST_API_TOKEN") {
        cfg.security.api_token = v;
    }

    let x = &mut cfg.credentials;
    let strings: [(&str, &mut String); 10] = [
        ("X_API_KEY", &mut x.api_key),
        ("X_API_SECRET", &mut x.api_secret),
        ("X_ACCESS_TOKEN", &mut x.access_token),
        ("X_ACCESS_TOKEN_SECRET", &mut x.access_token_secret),
        ("X_OAUTH2_CLIENT_ID", &mut x.oauth2_client_id),
        ("X_OAUTH2_CLIENT_SECRET", &mut x.oauth2_client_secret),
        ("X_OAUTH2_REDIRECT_URI", &mut x.oauth2_redirect_uri),
        ("X_OAUTH2_ACCESS_TOKEN", &mut x.oauth2_access_token),
        ("X_OAUTH2_REFRESH_TOKEN", &mut x.oauth2_refresh_token),
        ("X_OAUTH2_TOKEN_TYPE", &mut x.oauth2_token_type),
    ];
    for (name, field) in strings {
        if let Some(v) = get(name) {
            *field = v;
        }
    }

    if let Some(v) = get("X_OAUTH2_SCOPE") {
        x.oauth2_scope = split_csv(&v);
    }
    if let Some(v) = get("X_OAUTH2_EXPIRES_AT") {
        if let Ok(n) = v.parse::<i64>() {
            x.oauth2_expires_at = n;
        }
    }
}

/// Генерирует токен: 32 случайных байта в base64url без padding
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Разбивает строку по запятым, убирает пробелы, пустые и дубликаты
pub fn split_csv(raw: &str) -> Vec<String> {
    unique_non_empty(raw.split(','))
}

/// Убирает пустые строки и дубликаты, сохраняя порядок
pub fn unique_non_empty<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.as_ref().trim();
        if item.is_empty() || out.iter().any(|seen| seen == item) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

/// Проверка при первом запуске: нужен OAuth2 токен или полный набор OAuth1
pub fn ensure_first_boot_auth_configured(cfg: &CredentialConfig) -> AppResult<()> {
    if !cfg.oauth2_access_token.trim().is_empty() {
        return Ok(());
    }
    if crate::poster::missing_oauth1_fields(cfg).is_empty() {
        return Ok(());
    }
    Err(AppError::Config(
        "set OAuth1 credentials via X_API_KEY/X_API_SECRET/X_ACCESS_TOKEN/X_ACCESS_TOKEN_SECRET, or set X_OAUTH2_ACCESS_TOKEN"
            .to_string(),
    ))
}

/// Адрес в стиле ":8080" слушает все интерфейсы
pub fn bind_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
