//! streamplay - play streams with synchronized subtitles and autoplay-next
//!
//! # Usage
//!
//! ```bash
//! streamplay play /media/movie.mkv --imdb tt1877830 --subtitle eng
//! streamplay play http://127.0.0.1:8888/s01e01.mkv --imdb tt0944947 -s 1 -e 1 --episodes got.json
//! streamplay devices --json
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use streamplay::cli::{
    Cli, Command, ConfigCmd, DevicesCmd, ExitCode, Output, PlayCmd, PlayResponse, SubtitleChoice,
};
use streamplay::cli::validate_imdb_id;
use streamplay::config::{Config, SettingsProvider};
use streamplay::logging;
use streamplay::models::{
    DownloadStatus, Episode, EpisodeMedia, Media, MovieInfo, PlaybackRequest, PlayerState,
    ShowEpisodes, ShowInfo, StreamState, SubtitleInfo, SubtitlePreference, SubtitleTrack,
};
use streamplay::playback::{
    AutoplayService, InternalPlayer, JsonEpisodeLookup, LogNotifier, MediaDetailLookup, NoPicker,
    PlayStarted, PlaybackCoordinator, PlaybackEventHub, PlaybackObserver, Player, PlayerRegistry,
    SubtitleObserver, SubtitleSynchronizer, INTERNAL_PLAYER_ID,
};
use streamplay::stream::cast::{self, CastError, CastPlayer};
use streamplay::stream::{
    BackendError, BackendRegistry, ProcessBackend, StremioSubtitleProvider, TorrentStreamHub,
};

const CAST_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(cli.verbose, cli.quiet) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match &cli.command {
        Command::Play(cmd) => play_cmd(cmd, config, &output).await,
        Command::Devices(cmd) => devices_cmd(cmd, &output).await,
        Command::Config(cmd) => config_cmd(cmd, &cli, &config, &output),
    }
}

// =============================================================================
// Play
// =============================================================================

async fn play_cmd(cmd: &PlayCmd, config: Config, output: &Output) -> ExitCode {
    if let Some(imdb) = &cmd.imdb {
        if let Err(e) = validate_imdb_id(imdb) {
            return output.error(e, ExitCode::InvalidArgs);
        }
    }
    if cmd.url.trim().is_empty() {
        return output.error("URL must not be empty", ExitCode::InvalidArgs);
    }

    let choice = cmd.subtitle_choice();
    let settings = Arc::new(RwLock::new(config));
    let config = settings.read().clone();

    // Backends
    let player_type = cmd.player.unwrap_or(config.playback.preferred_player);
    let backend = Arc::new(ProcessBackend::new(player_type));
    if !backend.is_available().await {
        warn!("{} does not seem to be installed", player_type);
    }
    let backends = Arc::new(BackendRegistry::new());
    backends.register(backend);

    // Players
    let players = Arc::new(PlayerRegistry::new());
    if let Err(e) = players.register(Arc::new(InternalPlayer::new(backends.clone()))) {
        return output.error(e.to_string(), ExitCode::Error);
    }

    let cast_player = match &cmd.device {
        Some(device) => match cast_player(device).await {
            Ok(player) => Some(player),
            Err(code) => return output.error(format!("Device '{}' not available", device), code),
        },
        None => None,
    };
    let active_id = match &cast_player {
        Some(player) => {
            let id = player.id().to_string();
            if let Err(e) = players.register(player.clone()) {
                return output.error(e.to_string(), ExitCode::Error);
            }
            id
        }
        None => INTERNAL_PLAYER_ID.to_string(),
    };
    if let Err(e) = players.set_active(Some(&active_id)) {
        return output.error(e.to_string(), ExitCode::Error);
    }

    // Events, subtitles, autoplay
    let streams = Arc::new(TorrentStreamHub::new());
    let events = PlaybackEventHub::new(players.clone(), streams);

    let mut provider = StremioSubtitleProvider::from_settings(&config.subtitles);
    if let Some(SubtitleChoice::Language(lang)) = &choice {
        provider = provider.with_preference(SubtitlePreference::Language(lang.clone()));
    }
    let subtitles = SubtitleSynchronizer::new(
        Arc::new(provider),
        Arc::new(NoPicker),
        backends.clone(),
        Arc::new(LogNotifier),
        settings.clone(),
    );

    let lookup: Arc<dyn MediaDetailLookup> = match &cmd.episodes {
        Some(path) => Arc::new(JsonEpisodeLookup::new(path)),
        None => Arc::new(NoEpisodeLookup),
    };
    let (autoplay, next_requests) = AutoplayService::new(settings.clone(), lookup, players.clone());
    let coordinator = Arc::new(PlaybackCoordinator::new(
        players,
        events,
        subtitles,
        autoplay,
        next_requests,
    ));

    let (state_tx, mut states) = mpsc::unbounded_channel();
    let console = Arc::new(ConsoleObserver { states: state_tx });
    coordinator.events().add_observer(console.clone());
    coordinator.subtitles().add_observer(console);

    let request = match build_request(cmd, choice.as_ref(), settings.as_ref()).await {
        Ok(request) => request,
        Err(e) => return output.error(e.to_string(), ExitCode::InvalidArgs),
    };
    let title = request.title().to_string();

    let autoplay_loop = coordinator.next_requests().map(|receiver| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run_autoplay_loop(receiver).await })
    });

    if let Err(e) = coordinator.play(request).await {
        coordinator.dispose();
        return output.error(format!("{:#}", e), exit_code_for(&e));
    }

    let poller = cast_player.as_ref().map(|p| p.spawn_status_poller(CAST_POLL_INTERVAL));
    output.info(format!("Playing {}", title));

    let mut autoplayed = 0;
    let (state, code) = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                coordinator.stop();
                break (PlayerState::Stopped, ExitCode::Success);
            }
            state = states.recv() => match state {
                Some(PlayerState::Finished) => {
                    // Process backends report no duration, so the countdown never runs
                    if coordinator.autoplay().play_next_now() {
                        autoplayed += 1;
                        continue;
                    }
                    break (PlayerState::Finished, ExitCode::Success);
                }
                Some(PlayerState::Stopped) => break (PlayerState::Stopped, ExitCode::Success),
                Some(PlayerState::Error) => break (PlayerState::Error, ExitCode::PlaybackFailed),
                Some(state) => debug!("Player state {}", state),
                None => break (PlayerState::Unknown, ExitCode::Error),
            }
        }
    };

    if let Some(handle) = autoplay_loop {
        handle.abort();
    }
    if let Some(handle) = poller {
        handle.abort();
    }

    let player = coordinator
        .players()
        .active()
        .map(|p| p.name().to_string())
        .unwrap_or_default();
    coordinator.dispose();

    if code != ExitCode::Success {
        return output.error(format!("Playback of {} ended with {}", title, state), code);
    }
    if output.json {
        let response = PlayResponse { state, player, title, autoplayed };
        if let Err(e) = output.print(response) {
            return output.error(e.to_string(), ExitCode::Error);
        }
    }
    code
}

/// Check the device is on the network and create its player
async fn cast_player(device: &str) -> Result<Arc<CastPlayer>, ExitCode> {
    match cast::discover().await {
        Ok(devices) if devices.iter().any(|d| d.name.eq_ignore_ascii_case(device)) => {
            Ok(Arc::new(CastPlayer::new(device)))
        }
        Ok(_) | Err(CastError::NoDevices) => Err(ExitCode::DeviceNotFound),
        Err(e) => {
            warn!("Failed to discover devices, {}", e);
            Err(ExitCode::Error)
        }
    }
}

async fn build_request(
    cmd: &PlayCmd,
    choice: Option<&SubtitleChoice>,
    settings: &dyn SettingsProvider,
) -> anyhow::Result<PlaybackRequest> {
    let mut builder = PlaybackRequest::builder().url(cmd.url.trim());

    if let Some(title) = &cmd.title {
        builder = builder.title(title);
    }
    if let Some(quality) = cmd.quality.clone().or(settings.playback().default_quality) {
        builder = builder.quality(quality);
    }
    if let Some(resume) = cmd.resume {
        builder = builder.resume_timestamp(resume);
    }
    if let Some(media) = request_media(cmd).await? {
        if let Some(episode) = media.as_episode() {
            builder = builder.caption(format!(
                "S{:02}E{:02} {}",
                episode.episode.season, episode.episode.episode, episode.episode.name
            ));
        }
        builder = builder.media(media);
    }

    builder = match choice {
        Some(SubtitleChoice::None) => builder.subtitles_enabled(false),
        Some(choice) => match choice.info() {
            Some(info) => builder.subtitle(info),
            None => builder.subtitles_enabled(true),
        },
        None => builder.subtitles_enabled(settings.subtitles().preferred_language.is_some()),
    };

    Ok(builder.build())
}

async fn request_media(cmd: &PlayCmd) -> anyhow::Result<Option<Media>> {
    let key = cmd.episode_key();

    if let (Some(path), Some((season, episode))) = (&cmd.episodes, key) {
        let lookup = JsonEpisodeLookup::new(path);
        let show = lookup.show().await?;
        let episode = lookup.episode(season, episode).await?;
        return Ok(Some(Media::Episode(EpisodeMedia { show, episode })));
    }

    let Some(imdb_id) = cmd.imdb.clone() else {
        return Ok(None);
    };
    let title = cmd.title.clone().unwrap_or_else(|| fallback_title(&cmd.url));

    Ok(Some(match key {
        Some((season, episode)) => Media::Episode(EpisodeMedia {
            show: ShowInfo {
                id: imdb_id.clone(),
                imdb_id,
                title,
            },
            episode: Episode {
                season,
                episode,
                name: String::new(),
                overview: String::new(),
                runtime: None,
                imdb_id: None,
                sources: Default::default(),
            },
        }),
        None => Media::Movie(MovieInfo {
            imdb_id,
            title,
            year: None,
        }),
    }))
}

fn fallback_title(url: &str) -> String {
    streamplay::models::filename_without_extension(url).unwrap_or_else(|| url.to_string())
}

fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    if let Some(e) = error.downcast_ref::<BackendError>() {
        return match e {
            BackendError::NoCompatibleBackend { .. } => ExitCode::NoCompatibleBackend,
            BackendError::PlaybackStart { .. } => ExitCode::PlaybackFailed,
        };
    }
    match error.downcast_ref::<CastError>() {
        Some(CastError::CattNotFound) => ExitCode::Error,
        Some(CastError::NoDevices) => ExitCode::DeviceNotFound,
        Some(_) => ExitCode::PlaybackFailed,
        None if error.downcast_ref::<reqwest::Error>().is_some() => ExitCode::NetworkError,
        None => ExitCode::Error,
    }
}

/// Episode lookup used when no show description file is given
struct NoEpisodeLookup;

#[async_trait]
impl MediaDetailLookup for NoEpisodeLookup {
    async fn show_episodes(&self, show: &ShowInfo) -> anyhow::Result<ShowEpisodes> {
        anyhow::bail!("No episode list for {}, pass --episodes", show.title)
    }
}

/// Logs playback progress and forwards player states to the play loop
struct ConsoleObserver {
    states: UnboundedSender<PlayerState>,
}

impl PlaybackObserver for ConsoleObserver {
    fn on_play_started(&self, info: &PlayStarted) {
        match &info.caption {
            Some(caption) => info!("Started {} ({})", info.title, caption),
            None => info!("Started {}", info.title),
        }
    }

    fn on_state_changed(&self, state: PlayerState) {
        debug!("State changed to {}", state);
        let _ = self.states.send(state);
    }

    fn on_duration_changed(&self, duration_ms: u64) {
        debug!("Duration {} ms", duration_ms);
    }

    fn on_download_status(&self, status: &DownloadStatus) {
        debug!("{}", status);
    }

    fn on_stream_state_changed(&self, state: &StreamState) {
        info!("Stream {}", state);
    }
}

impl SubtitleObserver for ConsoleObserver {
    fn on_active_subtitle_changed(&self, info: &SubtitleInfo) {
        info!("Subtitle: {}", info.language.name());
    }

    fn on_subtitle_changed(&self, track: Option<&SubtitleTrack>) {
        if let Some(track) = track {
            info!("Subtitle track {} with {} cues", track.file.display(), track.cues.len());
        }
    }
}

// =============================================================================
// Devices / Config
// =============================================================================

async fn devices_cmd(cmd: &DevicesCmd, output: &Output) -> ExitCode {
    match cast::discover_with(&cmd.catt).await {
        Ok(devices) => {
            if output.json {
                if let Err(e) = output.print(&devices) {
                    return output.error(e.to_string(), ExitCode::Error);
                }
            } else {
                for device in &devices {
                    println!("{}", device);
                }
            }
            ExitCode::Success
        }
        Err(CastError::NoDevices) => {
            output.error("No Chromecast devices found", ExitCode::DeviceNotFound)
        }
        Err(e) => output.error(e.to_string(), ExitCode::Error),
    }
}

fn config_cmd(cmd: &ConfigCmd, cli: &Cli, config: &Config, output: &Output) -> ExitCode {
    let path = cli.config.clone().or_else(Config::path);

    if cmd.path {
        match path {
            Some(path) => println!("{}", path.display()),
            None => return output.error("Could not determine config path", ExitCode::Error),
        }
        return ExitCode::Success;
    }

    let printed = if output.json {
        output.print(config)
    } else {
        print_toml(config, path.as_deref())
    };
    match printed {
        Ok(()) => ExitCode::Success,
        Err(e) => output.error(e.to_string(), ExitCode::Error),
    }
}

fn print_toml(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = path {
        println!("# {}", path.display());
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
