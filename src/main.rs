//! abrcast client
//!
//! Uploads a video to the packaging backend, or plays an uploaded video's
//! adaptive stream on a headless player driven from the terminal.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use abrcast::config::Config;
use abrcast::logging::init_logging;
use abrcast::playback::{
    format_time, HeadlessSink, HlsEngineFactory, MediaSink, MediaState, PlaybackController,
};
use abrcast::upload::{format_file_size, SelectedFile, UploadController, UploadStatus, Uploader};

enum Command {
    Upload(PathBuf),
    Watch(String),
}

fn main() -> Result<()> {
    let _log_guard = init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let (config_path, command) = parse_args(&args)?;

    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };
    if let Ok(path) = config.config_path() {
        info!("Configuration loaded from {:?}", path);
    }

    let runtime = tokio::runtime::Runtime::new()?;

    // Ctrl+C flips the shutdown flag observed by both flows
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        let _ = shutdown_tx.send(true);
    })?;

    let result = runtime.block_on(async {
        match command {
            Command::Upload(path) => run_upload(&config, path, shutdown_rx).await,
            Command::Watch(video_id) => run_watch(&config, &video_id, shutdown_rx).await,
        }
    });

    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

fn parse_args(args: &[String]) -> Result<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        ["upload", file] => Command::Upload(PathBuf::from(file)),
        ["watch", video_id] => Command::Watch(video_id.to_string()),
        _ => bail!("Unrecognized arguments: {}", args.join(" ")),
    };

    Ok((config_path, command))
}

async fn run_upload(
    config: &Config,
    path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let uploader = Uploader::new(&config.upload)?;
    let mut controller = UploadController::new(uploader);

    let file = SelectedFile::from_path(&path).await?;
    println!(
        "Uploading {} ({})",
        file.name,
        format_file_size(file.size.unwrap_or(0))
    );

    if !controller.process_files(vec![file]) {
        bail!("Failed to start upload of {:?}", path);
    }

    let mut last_percent = None;
    loop {
        let status = tokio::select! {
            _ = shutdown.changed() => {
                warn!("Upload interrupted");
                controller.reset();
                return Ok(());
            }
            status = controller.next_event() => status,
        };

        match status {
            UploadStatus::Uploading => {
                let percent = controller.progress_percent();
                if last_percent != Some(percent) {
                    println!("Uploading... {}% complete", percent);
                    last_percent = Some(percent);
                }
            }
            UploadStatus::Success => {
                let video_id = controller.result_id().unwrap_or_default();
                println!("Upload successful!");
                println!("Watch video: {}", config.watch_url(video_id));
                return Ok(());
            }
            UploadStatus::Error => {
                let cause = controller
                    .task()
                    .and_then(|t| t.error.as_ref())
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".into());
                bail!("Upload failed: {}. Please try again.", cause);
            }
            UploadStatus::Idle => return Ok(()),
        }
    }
}

async fn run_watch(
    config: &Config,
    video_id: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let sink = Arc::new(HeadlessSink::new());
    let mut controller = PlaybackController::new(
        Arc::new(HlsEngineFactory::new()),
        config.playback.origin.clone(),
        Some(sink.clone() as Arc<dyn MediaSink>),
    );
    controller.open_stream(video_id)?;

    println!("Video ID: {}", video_id);
    print_watch_commands();

    let tick = Duration::from_millis(config.playback.tick_ms.max(10));
    let mut ticker = tokio::time::interval(tick);
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut states = controller.subscribe();
    let mut last_line = String::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => sink.advance(tick.as_secs_f64()),
            _ = controller.next_event() => {}
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if !handle_watch_command(&mut controller, &line, config.playback.skip_seconds) {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e).context("Failed to read command"),
                None => break,
            },
        }

        if states.has_changed().unwrap_or(false) {
            let line = status_line(&states.borrow_and_update());
            if line != last_line {
                println!("{}", line);
                last_line = line;
            }
        }
    }

    controller.close();
    info!("Player closed");
    Ok(())
}

/// Apply one typed command. Returns false when the user asked to quit.
fn handle_watch_command(controller: &mut PlaybackController, line: &str, skip_seconds: f64) -> bool {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return true;
    };
    let argument = parts.next().map(str::parse::<f64>);

    match (command, argument) {
        ("play", None) if !controller.state().is_playing => controller.toggle_play(),
        ("pause", None) if controller.state().is_playing => controller.toggle_play(),
        ("play" | "pause", None) => {}
        ("toggle" | "p", None) => controller.toggle_play(),
        ("mute", None) => controller.toggle_mute(),
        ("forward" | "f", None) => {
            controller.skip(skip_seconds);
        }
        ("back" | "b", None) => {
            controller.skip(-skip_seconds);
        }
        ("skip", Some(Ok(delta))) => {
            controller.skip(delta);
        }
        ("seek", Some(Ok(fraction))) => {
            controller.seek_to(fraction);
        }
        ("volume", Some(Ok(volume))) => controller.set_volume(volume),
        ("status", None) => println!("{}", status_line(controller.state())),
        ("reload", None) => {
            if let Err(e) = controller.reload() {
                println!("Reload failed: {}", e);
            }
        }
        ("quit" | "q", None) => return false,
        _ => print_watch_commands(),
    }
    true
}

fn status_line(state: &MediaState) -> String {
    let status = match (&state.error, state.is_loading, state.is_playing) {
        (Some(e), _, _) => format!("Error: {}", e),
        (None, true, _) => "Loading".to_string(),
        (None, false, true) => "Playing".to_string(),
        (None, false, false) => "Paused".to_string(),
    };

    format!(
        "[{}] {} / {} ({:.0}%) volume {:.0}%{}",
        status,
        format_time(state.current_time),
        format_time(state.duration),
        state.progress_percent(),
        state.volume * 100.0,
        if state.is_muted { " muted" } else { "" }
    )
}

fn print_watch_commands() {
    println!("Commands: play | pause | toggle | mute | forward | back | skip <secs>");
    println!("          seek <0..1> | volume <0..1> | status | reload | quit");
}

fn print_help() {
    println!("abrcast - Upload videos and watch them as adaptive streams");
    println!();
    println!("USAGE:");
    println!("    abrcast [OPTIONS] upload <FILE>");
    println!("    abrcast [OPTIONS] watch <VIDEO_ID>");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>   Use this config file instead of the default");
    println!("    -h, --help            Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG              Set log level (e.g., debug, info, warn)");
    println!("    ABRCAST_LOG_PATH      Directory for log files");
}
