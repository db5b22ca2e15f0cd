use crate::api::oauth2::{self, OAuth2App};
use crate::config::{self, Config, DEFAULT_REDIRECT_URI};
use crate::install::{self, InstallOptions};
use crate::models::MediaInput;
use crate::poster::context::{RequestContext, REQUEST_TIMEOUT};
use crate::poster::media::{sniff_content_type, MAX_MEDIA_BYTES, MAX_MEDIA_COUNT};
use crate::poster::{effective_oauth2_scopes, token, Poster};
use crate::server::{self, App};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Публикация в X из командной строки или через HTTP
#[derive(Parser, Debug)]
#[command(name = "xpost", version, about, long_about = None)]
pub struct Cli {
    /// Путь к конфигу (по умолчанию ~/.config/xpost/config.json)
    #[arg(long, global = true, env = "XPOST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Запустить HTTP сервер (команда по умолчанию)
    Serve {
        /// Конфиг только из переменных окружения, без записи на диск
        #[arg(long)]
        stateless: bool,
    },
    /// Получить OAuth2 токен через браузер
    Login(LoginArgs),
    /// Опубликовать пост
    Tweet(TweetArgs),
    /// Установить systemd сервис
    Install(InstallArgs),
}

#[derive(Args, Debug, Default)]
pub struct LoginArgs {
    /// OAuth2 client ID (или X_OAUTH2_CLIENT_ID)
    #[arg(long)]
    pub client_id: Option<String>,
    /// OAuth2 client secret (или X_OAUTH2_CLIENT_SECRET)
    #[arg(long)]
    pub client_secret: Option<String>,
    /// OAuth2 redirect URI (или X_OAUTH2_REDIRECT_URI)
    #[arg(long)]
    pub redirect_uri: Option<String>,
    /// Scopes через запятую
    #[arg(long)]
    pub scope: Option<String>,
    /// Не открывать браузер
    #[arg(long)]
    pub no_open: bool,
}

#[derive(Args, Debug, Default)]
pub struct TweetArgs {
    /// Текст поста
    #[arg(long, default_value = "")]
    pub text: String,
    /// Путь к медиа файлу (можно повторять, максимум 4)
    #[arg(long)]
    pub media: Vec<PathBuf>,
    /// Текст, если --text не задан
    #[arg(trailing_var_arg = true)]
    pub words: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct InstallArgs {
    /// Путь к бинарнику (по умолчанию текущий)
    #[arg(long)]
    pub bin: Option<PathBuf>,
    /// systemd User (по умолчанию вызвавший sudo)
    #[arg(long)]
    pub user: Option<String>,
    /// Только напечатать unit файл
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_path = self
            .config
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(config::default_config_path);

        match self.command.unwrap_or(Command::Serve { stateless: false }) {
            Command::Serve { stateless } => serve(&config_path, stateless).await,
            Command::Login(args) => login(&config_path, args).await,
            Command::Tweet(args) => tweet(&config_path, args).await,
            Command::Install(args) => {
                let cfg = load_cli_config(&config_path)?;
                config::ensure_first_boot_auth_configured(&cfg.credentials)
                    .context("credentials not configured, run `xpost login` first")?;
                install::install(
                    &config_path,
                    InstallOptions {
                        bin: args.bin,
                        user: args.user,
                        dry_run: args.dry_run,
                    },
                )
                .await
            }
        }
    }
}

async fn serve(config_path: &Path, stateless: bool) -> Result<()> {
    if stateless {
        let app = App::stateless_from_env().context("stateless startup failed")?;
        info!("Starting in stateless mode, config is read from environment only");
        return Ok(server::run_server(Arc::new(app)).await?);
    }

    let (mut cfg, first_boot) =
        config::load_or_init(config_path).context("failed to initialize config")?;
    config::apply_env_overrides(&mut cfg);

    if first_boot {
        config::ensure_first_boot_auth_configured(&cfg.credentials)
            .context("first boot credential check failed")?;
        config::save(config_path, &cfg).context("failed to persist first boot config")?;
        info!("First boot: config initialized at {}", config_path.display());
        if env_is_set("XPOST_API_TOKEN") {
            info!("First boot: API token loaded from XPOST_API_TOKEN");
        } else {
            info!("First boot: API token auto-generated, see config file");
        }
    }

    let app = App::new(cfg, Some(config_path.to_path_buf()));
    Ok(server::run_server(Arc::new(app)).await?)
}

async fn login(config_path: &Path, args: LoginArgs) -> Result<()> {
    let mut cfg = load_cli_config(config_path)?;
    let creds = &mut cfg.credentials;

    let flags = [
        (args.client_id, &mut creds.oauth2_client_id),
        (args.client_secret, &mut creds.oauth2_client_secret),
        (args.redirect_uri, &mut creds.oauth2_redirect_uri),
    ];
    for (flag, field) in flags {
        if let Some(value) = flag.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            *field = value;
        }
    }
    if let Some(scope) = args.scope.filter(|s| !s.trim().is_empty()) {
        creds.oauth2_scope = config::split_csv(&scope);
    }

    if creds.oauth2_client_id.trim().is_empty() {
        bail!("oauth2 client id is required (set --client-id or X_OAUTH2_CLIENT_ID)");
    }
    if creds.oauth2_redirect_uri.trim().is_empty() {
        creds.oauth2_redirect_uri = DEFAULT_REDIRECT_URI.to_string();
        println!("Using default redirect URI: {}", DEFAULT_REDIRECT_URI);
        println!("Make sure this URI is added to your app's callback URLs in the X Developer Portal.");
    }

    let scopes = effective_oauth2_scopes(&creds.oauth2_scope);
    let secret = creds.oauth2_client_secret.trim();
    let app = OAuth2App {
        client_id: creds.oauth2_client_id.trim().to_string(),
        client_secret: (!secret.is_empty()).then(|| secret.to_string()),
        redirect_uri: creds.oauth2_redirect_uri.trim().to_string(),
        scopes: scopes.clone(),
        token_url: oauth2::TOKEN_URL.to_string(),
    };

    let state = config::generate_token();
    let (verifier, challenge) = oauth2::generate_pkce();
    let auth_url = oauth2::authorization_url(&app, &state, &challenge)
        .context("failed to generate authorization URL")?;

    println!("Open this URL to authorize:\n{}\n", auth_url);
    if !args.no_open {
        if let Err(e) = open_browser(&auth_url) {
            warn!("Failed to open browser automatically: {}", e);
        }
    }

    print!("Paste callback URL: ");
    std::io::stdout().flush()?;
    let mut callback = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut callback)
        .await
        .context("failed to read callback URL")?;
    let callback = callback.trim();
    if callback.is_empty() {
        bail!("callback URL cannot be empty");
    }

    let code = oauth2::parse_callback(callback, &state)?;
    let http = reqwest::Client::new();
    let ctx = RequestContext::with_timeout(REQUEST_TIMEOUT);
    let token = ctx
        .run(oauth2::exchange_code(&http, &app, &code, &verifier))
        .await
        .context("oauth2 token exchange failed")?;

    let token = match serde_json::to_value(&token)? {
        serde_json::Value::Object(map) => map,
        _ => bail!("oauth2 token has unexpected shape"),
    };
    cfg.credentials.oauth2_scope = scopes;
    token::apply_oauth2_token(&mut cfg.credentials, &token, chrono::Utc::now().timestamp())?;
    config::save(config_path, &cfg).context("failed to save config")?;

    println!("Login succeeded. OAuth2 token saved to {}", config_path.display());
    Ok(())
}

async fn tweet(config_path: &Path, args: TweetArgs) -> Result<()> {
    let mut text = args.text.trim().to_string();
    if text.is_empty() && !args.words.is_empty() {
        text = args.words.join(" ").trim().to_string();
    }

    let media = media_inputs_from_paths(&args.media).await?;
    if text.is_empty() && media.is_empty() {
        bail!("text or media is required");
    }

    let mut cfg = load_cli_config(config_path)?;
    let poster = Poster::resolve(&cfg.credentials).map_err(|e| {
        if e.is_not_ready() {
            anyhow!("x auth is not ready: {} (run `xpost login` for oauth2)", e)
        } else {
            anyhow::Error::new(e)
        }
    })?;

    let ctx = RequestContext::with_timeout(REQUEST_TIMEOUT);
    let cancel = ctx.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            cancel.cancel();
        }
    });
    let result = poster.publish(&ctx, &text, &media).await;
    interrupt.abort();
    let outcome = result?;

    if let Err(e) = token::persist_oauth2_token(&mut cfg, config_path, &poster) {
        warn!("Failed to persist refreshed OAuth2 token: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn load_cli_config(config_path: &Path) -> Result<Config> {
    let (mut cfg, _) = config::load_or_init(config_path).context("failed to load config")?;
    config::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

async fn media_inputs_from_paths(paths: &[PathBuf]) -> Result<Vec<MediaInput>> {
    if paths.len() > MAX_MEDIA_COUNT {
        bail!("too many media files, max is {}", MAX_MEDIA_COUNT);
    }

    let mut media = Vec::with_capacity(paths.len());
    for path in paths.iter().filter(|p| !p.as_os_str().is_empty()) {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read media file {:?}", path))?;
        if data.len() > MAX_MEDIA_BYTES {
            bail!("file {:?} exceeds max size {} bytes", path, MAX_MEDIA_BYTES);
        }
        let content_type = sniff_content_type(&data).to_string();
        media.push(MediaInput { data, content_type });
    }
    Ok(media)
}

fn open_browser(url: &str) -> std::io::Result<()> {
    let mut cmd = if cfg!(target_os = "macos") {
        tokio::process::Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut cmd = tokio::process::Command::new("rundll32");
        cmd.arg("url.dll,FileProtocolHandler");
        cmd
    } else {
        tokio::process::Command::new("xdg-open")
    };
    cmd.arg(url).spawn().map(|_| ())
}

fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok_and(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_tweet_command() {
        let cli = Cli::try_parse_from([
            "xpost", "tweet", "--media", "a.png", "--media", "b.jpg", "hello", "world",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Tweet(args)) => {
                assert_eq!(args.text, "");
                assert_eq!(args.media, vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")]);
                assert_eq!(args.words, vec!["hello", "world"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parses_serve_and_login_flags() {
        let cli = Cli::try_parse_from(["xpost", "--config", "/tmp/x.json", "serve", "--stateless"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.json")));
        assert!(matches!(cli.command, Some(Command::Serve { stateless: true })));

        let cli = Cli::try_parse_from(["xpost", "login", "--client-id", "abc", "--no-open"]).unwrap();
        match cli.command {
            Some(Command::Login(args)) => {
                assert_eq!(args.client_id.as_deref(), Some("abc"));
                assert!(args.no_open);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["xpost"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[tokio::test]
    async fn media_files_are_read_and_sniffed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pic");
        std::fs::write(&path, b"\xff\xd8\xff\xe0rest").unwrap();

        let media = media_inputs_from_paths(&[path]).await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn media_limits_are_enforced() {
        let paths: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{}.png", i))).collect();
        let err = media_inputs_from_paths(&paths).await.unwrap_err();
        assert!(err.to_string().contains("max is 4"));

        let dir = TempDir::new().unwrap();
        let big = dir.path().join("big.bin");
        std::fs::write(&big, vec![0u8; MAX_MEDIA_BYTES + 1]).unwrap();
        let err = media_inputs_from_paths(&[big]).await.unwrap_err();
        assert!(err.to_string().contains("exceeds max size"));

        let err = media_inputs_from_paths(&[dir.path().join("missing")]).await.unwrap_err();
        assert!(err.to_string().contains("failed to read media file"));
    }
}
