use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::redirect::Policy;
use std::path::PathBuf;
use std::sync::Arc;

use streamshelf::auth::{AuthClient, TokenSlot};
use streamshelf::backend::{RestStore, SqliteStore, UserDataStore};
use streamshelf::catalog::{CatalogClient, Video, CATEGORIES};
use streamshelf::collections::{CollectionClient, AVATAR_IDS};
use streamshelf::config::{BackendKind, Config, ENV_ANON_KEY, ENV_BACKEND_URL, ENV_CATALOG_KEY};
use streamshelf::store::{
    CollectionStore, CollectionVideo, FeedStore, LoadOutcome, Notice, SessionStore, SkipReason,
};
use streamshelf::util::{pad_to_width, sanitize_line, truncate_to_width, validate_playback_url};

const TITLE_WIDTH: usize = 48;

/// Get the config directory path (~/.config/streamshelf)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("streamshelf"))
}

/// Follow at most 3 redirects and refuse loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(to = %url, hop = attempt.previous().len() + 1, "Following redirect");
        attempt.follow()
    })
}

#[derive(Parser, Debug)]
#[command(
    name = "streamshelf",
    about = "Browse a video catalog and manage favourites, watch later, history and playlists"
)]
struct Args {
    /// Config file (default: ~/.config/streamshelf/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the popular feed, or one category of it
    Feed {
        #[arg(long)]
        category: Option<String>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Search the catalog
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Show a video, record it in history and list suggestions
    Watch {
        id: String,
        /// Open the video in the system player
        #[arg(long)]
        open: bool,
    },
    /// Email a sign-in code
    Login { email: String },
    /// Sign in with the emailed 6-digit code
    Verify { email: String, code: String },
    Logout,
    Whoami,
    /// Show or update the profile
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar: Option<u8>,
    },
    Favourites,
    WatchLater,
    History,
    /// Add a video to favourites
    Fav { id: String },
    /// Add a video to watch later
    Later { id: String },
    Unfav { id: String },
    Unlater { id: String },
    /// Remove one history entry by its entry id
    Forget { entry_id: i64 },
    Playlists,
    Playlist {
        #[command(subcommand)]
        action: PlaylistCommand,
    },
    /// List feed categories
    Categories,
}

#[derive(Subcommand, Debug)]
enum PlaylistCommand {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Show { id: i64 },
    Add { playlist_id: i64, video_id: String },
    Remove { playlist_id: i64, video_id: String },
    Delete { id: i64 },
}

// ============================================================================
// Wiring
// ============================================================================

struct Services {
    client: CollectionClient,
    session: Arc<SessionStore>,
    collections: CollectionStore,
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(create_redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .build()
        .context("Failed to build HTTP client")
}

fn build_catalog(config: &Config, http: &reqwest::Client) -> Result<CatalogClient> {
    let key = config.catalog_api_key.clone().with_context(|| {
        format!("No catalog API key: set {ENV_CATALOG_KEY} or catalog_api_key in config.toml")
    })?;
    Ok(
        CatalogClient::new(http.clone(), &config.catalog_base_url, key)?
            .with_timeout(config.request_timeout()),
    )
}

async fn build_services(
    config: &Config,
    config_dir: &std::path::Path,
    http: &reqwest::Client,
    catalog: CatalogClient,
) -> Result<Services> {
    let backend_url = config.backend_url.clone().with_context(|| {
        format!("No backend URL: set {ENV_BACKEND_URL} or backend_url in config.toml")
    })?;
    let anon_key = config.anon_key.clone().with_context(|| {
        format!("No backend anon key: set {ENV_ANON_KEY} or anon_key in config.toml")
    })?;
    let tokens = TokenSlot::new();

    let store: Arc<dyn UserDataStore> = match config.backend {
        BackendKind::Rest => Arc::new(
            RestStore::new(http.clone(), &backend_url, anon_key.clone(), tokens.clone())?
                .with_timeout(config.request_timeout()),
        ),
        BackendKind::Sqlite => {
            let path = config
                .sqlite_path
                .clone()
                .unwrap_or_else(|| config_dir.join("streamshelf.db"));
            let path = path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?
                .to_string();
            Arc::new(
                SqliteStore::open(&path)
                    .await
                    .with_context(|| format!("Failed to open database at {path}"))?,
            )
        }
    };
    tracing::debug!(backend = store.name(), "Data store ready");

    let auth = AuthClient::new(http.clone(), &backend_url, anon_key)?
        .with_timeout(config.request_timeout());
    let client = CollectionClient::new(store, catalog);
    let session = Arc::new(SessionStore::new(
        auth,
        client.clone(),
        tokens,
        Some(config_dir.join("session.json")),
    ));
    session.restore().context("Failed to restore session")?;
    let collections = CollectionStore::new(client.clone(), session.clone());

    Ok(Services {
        client,
        session,
        collections,
    })
}

fn require_user(services: &Services) -> Result<String> {
    services
        .session
        .user_id()
        .ok_or_else(|| anyhow::anyhow!(Notice::login_required().message))
}

// ============================================================================
// Output
// ============================================================================

fn video_line(video: &Video) -> String {
    let title = sanitize_line(&video.title);
    let user = sanitize_line(&video.user);
    format!(
        "{:>10}  {}  {:>6}  {:<14} {}",
        video.id,
        pad_to_width(&title, TITLE_WIDTH),
        video.duration_label(),
        video.category,
        truncate_to_width(&user, 24),
    )
}

fn print_videos(videos: &[Video]) {
    if videos.is_empty() {
        println!("No videos.");
    }
    for video in videos {
        println!("{}", video_line(video));
    }
}

fn print_collection(videos: &[CollectionVideo]) {
    if videos.is_empty() {
        println!("Nothing saved yet.");
    }
    for item in videos {
        println!(
            "#{:<6} {}  {}",
            item.entry_id,
            item.saved_at.format("%Y-%m-%d %H:%M"),
            video_line(&item.video)
        );
    }
}

fn report(notice: Notice) -> Result<()> {
    if notice.is_error() {
        anyhow::bail!(notice.message);
    }
    println!("{notice}");
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_feed(catalog: CatalogClient, category: Option<String>, pages: u32) -> Result<()> {
    let feed = FeedStore::new(catalog);
    let first = match &category {
        Some(name) => feed.set_category(name).await,
        None => feed.load().await,
    };
    if first == LoadOutcome::Failed {
        let state = feed.snapshot();
        anyhow::bail!(state.error.unwrap_or_else(|| "Feed failed to load".into()));
    }

    for _ in 1..pages.max(1) {
        match feed.load_more().await {
            LoadOutcome::Loaded { .. } => {}
            LoadOutcome::Skipped(SkipReason::Exhausted) => break,
            LoadOutcome::Failed => {
                if let Some(error) = feed.snapshot().error {
                    eprintln!("Stopped loading: {error}");
                }
                break;
            }
            LoadOutcome::Skipped(SkipReason::InFlight) | LoadOutcome::Stale => break,
        }
    }

    let state = feed.snapshot();
    println!(
        "{} - {} videos (page {}{})",
        state.category,
        state.videos.len(),
        state.page,
        if state.has_more { ", more available" } else { "" }
    );
    print_videos(&state.videos);
    Ok(())
}

async fn run_watch(
    catalog: &CatalogClient,
    services: Option<&Services>,
    id: &str,
    open: bool,
) -> Result<()> {
    let video = catalog.get_by_id(id).await?;
    println!("{}", sanitize_line(&video.title));
    println!(
        "by {}  |  {} views  |  {} likes  |  {}  |  {}",
        sanitize_line(&video.user),
        video.views,
        video.likes,
        video.duration_label(),
        video.category
    );

    if let Some(services) = services {
        services.collections.record_view(&video.id).await;
        if services.session.is_signed_in() {
            if let Err(notice) = services.collections.sync_membership().await {
                tracing::warn!(error = %notice.message, "Could not refresh saved marks");
            }
            let mut marks = Vec::new();
            if services.collections.is_favourite(&video.id) {
                marks.push("favourite");
            }
            if services.collections.is_in_watch_later(&video.id) {
                marks.push("in watch later");
            }
            if !marks.is_empty() {
                println!("({})", marks.join(", "));
            }
        }
    }

    match video.playback_rendition() {
        Some((name, rendition)) => {
            println!("{name}: {} ({}x{})", rendition.url, rendition.width, rendition.height);
            if open {
                let url = validate_playback_url(&rendition.url)
                    .with_context(|| format!("Refusing to open {}", rendition.url))?;
                open::that(url.as_str()).context("Failed to open player")?;
            }
        }
        None => println!("No playable rendition."),
    }

    match catalog.suggestions(&video.id).await {
        Ok(suggestions) => {
            println!();
            println!("Up next:");
            print_videos(&suggestions);
        }
        Err(e) => tracing::warn!(error = %e, "Could not load suggestions"),
    }
    Ok(())
}

fn show_collection(services: &Services, outcome: LoadOutcome) -> Result<()> {
    let view = services.collections.snapshot();
    if outcome == LoadOutcome::Failed {
        anyhow::bail!(view.error.unwrap_or_else(|| "Could not load collection".into()));
    }
    print_collection(&view.videos);
    Ok(())
}

async fn run_playlist(services: &Services, action: PlaylistCommand) -> Result<()> {
    let user_id = require_user(services)?;
    let client = &services.client;
    match action {
        PlaylistCommand::Create { name, description } => {
            let playlist = client.create_playlist(&user_id, &name, &description).await?;
            println!("Created playlist #{} {}", playlist.id, playlist.name);
        }
        PlaylistCommand::Show { id } => {
            let found = client.get_playlist_with_videos(id).await?;
            let playlist = found
                .playlist
                .with_context(|| format!("Playlist #{id} not found"))?;
            println!("#{} {}", playlist.id, sanitize_line(&playlist.name));
            if !playlist.description.is_empty() {
                println!("{}", sanitize_line(&playlist.description));
            }
            print_videos(&found.videos);
        }
        PlaylistCommand::Add {
            playlist_id,
            video_id,
        } => {
            client
                .add_video_to_playlist(&user_id, playlist_id, &video_id)
                .await?;
            println!("Video added to playlist!");
        }
        PlaylistCommand::Remove {
            playlist_id,
            video_id,
        } => {
            let removed = client
                .delete_video_from_playlist(&user_id, playlist_id, &video_id)
                .await?;
            if removed == 0 {
                println!("Video was not in that playlist.");
            } else {
                println!("Video removed from playlist.");
            }
        }
        PlaylistCommand::Delete { id } => {
            if client.delete_playlist(&user_id, id).await? {
                println!("Playlist deleted.");
            } else {
                println!("No playlist #{id}.");
            }
        }
    }
    Ok(())
}

async fn run(command: Command, config: Config, config_dir: PathBuf) -> Result<()> {
    if let Command::Categories = command {
        for category in CATEGORIES {
            println!("{category}");
        }
        return Ok(());
    }

    let http = build_http_client()?;
    let catalog = build_catalog(&config, &http)?;

    match command {
        Command::Feed { category, pages } => return run_feed(catalog, category, pages).await,
        Command::Search { query, page } => {
            let results = catalog.search(&query, page).await?;
            println!("{} matches, page {}", results.total_hits, results.page);
            print_videos(&results.videos);
            return Ok(());
        }
        Command::Watch { id, open } => {
            // History is recorded only when a backend is configured
            let services = if config.backend_url.is_some() {
                Some(build_services(&config, &config_dir, &http, catalog.clone()).await?)
            } else {
                None
            };
            return run_watch(&catalog, services.as_ref(), &id, open).await;
        }
        _ => {}
    }

    let services = build_services(&config, &config_dir, &http, catalog).await?;

    match command {
        Command::Login { email } => {
            services.session.request_code(&email).await?;
            println!("Check your inbox, then run: streamshelf verify {email} <code>");
        }
        Command::Verify { email, code } => {
            let user = services.session.verify_code(&email, &code).await?;
            println!(
                "Signed in as {}",
                user.email.as_deref().unwrap_or(user.id.as_str())
            );
        }
        Command::Logout => {
            services.session.sign_out().await?;
            println!("Signed out.");
        }
        Command::Whoami => match services.session.user() {
            Some(_) => {
                let user = services.session.refresh_user().await?;
                let profile = services.session.refresh_profile().await?;
                println!("{}", user.email.as_deref().unwrap_or("(no email)"));
                println!("id: {}", user.id);
                if !profile.full_name.is_empty() {
                    println!("name: {}", sanitize_line(&profile.full_name));
                }
                if profile.profile_picture != 0 {
                    println!("avatar: {}", profile.profile_picture);
                }
            }
            None => println!("Not signed in."),
        },
        Command::Profile { name, avatar } => {
            require_user(&services)?;
            let current = services.session.refresh_profile().await?;
            if name.is_none() && avatar.is_none() {
                println!("name: {}", sanitize_line(&current.full_name));
                println!(
                    "avatar: {} (choose {}-{})",
                    current.profile_picture,
                    AVATAR_IDS.start(),
                    AVATAR_IDS.end()
                );
            } else {
                let full_name = name.unwrap_or(current.full_name);
                let avatar = avatar.unwrap_or(current.profile_picture);
                services.session.update_profile(&full_name, avatar).await?;
                println!("Profile updated.");
            }
        }
        Command::Favourites => {
            show_collection(&services, services.collections.fetch_favourites().await)?
        }
        Command::WatchLater => {
            show_collection(&services, services.collections.fetch_watch_later().await)?
        }
        Command::History => {
            show_collection(&services, services.collections.fetch_history().await)?
        }
        // sync_membership fails with the login notice when signed out
        Command::Fav { id } => {
            services.collections.sync_membership().await.map_err(|n| anyhow::anyhow!(n.message))?;
            report(services.collections.toggle_favourite(&id).await)?;
        }
        Command::Later { id } => {
            services.collections.sync_membership().await.map_err(|n| anyhow::anyhow!(n.message))?;
            report(services.collections.toggle_watch_later(&id).await)?;
        }
        Command::Unfav { id } => {
            services.collections.sync_membership().await.map_err(|n| anyhow::anyhow!(n.message))?;
            report(services.collections.remove_favourite(&id).await)?;
        }
        Command::Unlater { id } => {
            services.collections.sync_membership().await.map_err(|n| anyhow::anyhow!(n.message))?;
            report(services.collections.remove_watch_later(&id).await)?;
        }
        Command::Forget { entry_id } => {
            report(services.collections.delete_history_entry(entry_id).await)?;
        }
        Command::Playlists => {
            let user_id = require_user(&services)?;
            let playlists = services.client.list_playlists_by_user(&user_id).await?;
            if playlists.is_empty() {
                println!("No playlists.");
            }
            for playlist in playlists {
                println!(
                    "#{:<6} {}  {}",
                    playlist.id,
                    pad_to_width(&sanitize_line(&playlist.name), 30),
                    truncate_to_width(&sanitize_line(&playlist.description), 40)
                );
            }
        }
        Command::Playlist { action } => run_playlist(&services, action).await?,
        Command::Categories | Command::Feed { .. } | Command::Search { .. } | Command::Watch { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // Session and database live here; keep the directory user-only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?
        .with_env_overrides();
    tracing::debug!(config = ?config, "Effective configuration");

    run(args.command, config, config_dir).await
}
