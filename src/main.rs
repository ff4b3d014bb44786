use std::env;
use std::path::Path;
use std::process::ExitCode;

use cueline::{LogDevice, OutputDevice, Playback, PlaybackNotification, Score};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cueline=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "midir-output")]
fn open_output(port: Option<&str>) -> Result<Box<dyn OutputDevice>, String> {
    match port {
        Some(name) => cueline::MidirOutput::connect(Some(name))
            .map(|output| Box::new(output) as Box<dyn OutputDevice>)
            .map_err(|e| e.to_string()),
        None => Ok(Box::new(LogDevice::default())),
    }
}

#[cfg(not(feature = "midir-output"))]
fn open_output(port: Option<&str>) -> Result<Box<dyn OutputDevice>, String> {
    if port.is_some() {
        return Err("--port requires the 'midir-output' feature".to_string());
    }
    Ok(Box::new(LogDevice::default()))
}

fn main() -> ExitCode {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let Some(score_path) = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && !matches!(args[i - 1].as_str(), "--speed" | "--port"))
        .map(|(_, a)| a)
    else {
        let program = args.first().map_or("cueline", String::as_str);
        eprintln!("Usage: {program} <score.ron> [--loop] [--speed X] [--port NAME]");
        return ExitCode::FAILURE;
    };
    let looped = args.iter().any(|a| a == "--loop");
    let speed = args
        .iter()
        .position(|a| a == "--speed")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.parse::<f64>());
    let port = args
        .iter()
        .position(|a| a == "--port")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);

    let score = match Score::load(Path::new(score_path)) {
        Ok(score) => score,
        Err(e) => {
            error!(path = %score_path, error = %e, "failed to load score");
            return ExitCode::FAILURE;
        }
    };

    let mut settings = score.settings.clone();
    settings.looped |= looped;
    match speed {
        Some(Ok(speed)) => settings.speed = speed,
        Some(Err(e)) => {
            error!(error = %e, "invalid --speed");
            return ExitCode::FAILURE;
        }
        None => {}
    }

    let output = match open_output(port) {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "failed to open output");
            return ExitCode::FAILURE;
        }
    };

    let playback = match score
        .tempo_map()
        .and_then(|map| Playback::new(score.objects(), map, settings))
    {
        Ok(playback) => playback,
        Err(e) => {
            error!(error = %e, "failed to create playback");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = playback.set_output_device(Some(output)) {
        error!(error = %e, "failed to attach output");
        return ExitCode::FAILURE;
    }

    let notifications = playback.subscribe();
    info!(name = %score.name, duration = ?playback.duration(cueline::TimeSpanKind::Metric), "playing");
    if let Err(e) = playback.start() {
        error!(error = %e, "failed to start");
        return ExitCode::FAILURE;
    }

    for notification in notifications.iter() {
        match notification {
            PlaybackNotification::Finished | PlaybackNotification::Stopped => break,
            PlaybackNotification::RepeatStarted => info!("repeat"),
            PlaybackNotification::NotesPlaybackStarted { notes, .. } => {
                for note in notes {
                    info!(note = note.note_number, channel = note.channel, "note on");
                }
            }
            PlaybackNotification::DeviceErrorOccurred { event, error } => {
                warn!(?event, %error, "device error");
            }
            _ => {}
        }
    }

    playback.dispose();
    info!("done");
    ExitCode::SUCCESS
}
