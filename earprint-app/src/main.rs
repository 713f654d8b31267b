//! Earprint headless host.
//!
//! ```text
//! earprint play     [settings.json]
//! earprint convolve <input.wav> <output.wav> [settings.json]
//! earprint correct  <input-hrir.wav> <output-hrir.wav> [settings.json]
//! earprint devices
//! ```
//!
//! Settings default to the per-user file from [`default_settings_path`].

mod settings;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use earprint_core::{
    audio::device::list_devices,
    crosstalk::{design_crosstalk_filters, CrosstalkPaths},
    render::offline::convolve_file,
    speaker::STANDARD_TRACK_ORDER,
    CorrectionPipeline, HrirTable, RealTimeConvolver, RenderConfig, RenderSession, SessionStatus,
    StreamOptions,
};
use settings::{default_settings_path, load_settings, PlaybackSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const USAGE: &str = "Usage:
  earprint play     [settings.json]
  earprint convolve <input.wav> <output.wav> [settings.json]
  earprint correct  <input-hrir.wav> <output-hrir.wav> [settings.json]
  earprint devices";

fn settings_from(arg: Option<&String>) -> PlaybackSettings {
    let path = arg.map(PathBuf::from).unwrap_or_else(default_settings_path);
    info!(path = %path.display(), "loading settings");
    load_settings(&path)
}

/// Reads the configured table and optionally runs the correction pipeline on it.
fn load_table(settings: &PlaybackSettings) -> anyhow::Result<HrirTable> {
    let Some(path) = settings.hrir_path.as_deref() else {
        bail!("no hrirPath configured");
    };
    let mut table = HrirTable::read_wav(path)
        .with_context(|| format!("failed to read impulse responses from {}", path.display()))?;
    if settings.apply_correction {
        let report = CorrectionPipeline::new(settings.processing.clone()).run(&mut table)?;
        if report.warnings > 0 {
            warn!(warnings = report.warnings, "measurement warnings during correction");
        }
    }
    Ok(table)
}

fn build_convolver(settings: &PlaybackSettings, table: &HrirTable) -> anyhow::Result<RealTimeConvolver> {
    let mut config = RenderConfig::new(settings.block_size);
    if settings.crosstalk_enabled {
        let [left, right] = settings.crosstalk_speakers;
        let paths = CrosstalkPaths::from_table(table, left, right)?;
        let filters = design_crosstalk_filters(
            &paths,
            settings.crosstalk_filter_length,
            settings.crosstalk_regularization,
        );
        config = config.with_crosstalk(filters);
    }
    Ok(RealTimeConvolver::from_table(table, &config)?)
}

fn play(settings: PlaybackSettings) -> anyhow::Result<()> {
    let table = load_table(&settings)?;
    let convolver = build_convolver(&settings, &table)?;
    let session = RenderSession::with_system_audio(convolver);
    let mut status_rx = session.subscribe_status();

    session.start(StreamOptions {
        input_device: settings.preferred_input_device.clone(),
        output_device: settings.preferred_output_device.clone(),
        duration: settings.duration_seconds.map(Duration::from_secs_f64),
    })?;
    info!("playing, press Ctrl+C to stop");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
                event = status_rx.recv() => match event {
                    Ok(ev) if ev.status == SessionStatus::Running => continue,
                    Ok(ev) => {
                        info!(status = ?ev.status, detail = ?ev.detail, "session status changed");
                        break;
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    match session.stop() {
        Ok(()) | Err(earprint_core::EarprintError::NotRunning) => {}
        Err(e) => return Err(e.into()),
    }
    let diagnostics = session.diagnostics_snapshot();
    info!(
        blocks = diagnostics.blocks_processed,
        contention_misses = diagnostics.contention_misses,
        input_underruns = diagnostics.input_underruns,
        input_overruns = diagnostics.input_overruns,
        "playback finished"
    );
    Ok(())
}

fn convolve(input: &Path, output: &Path, settings: PlaybackSettings) -> anyhow::Result<()> {
    let table = load_table(&settings)?;
    convolve_file(input, output, &table, settings.block_size)?;
    Ok(())
}

fn correct(input: &Path, output: &Path, settings: PlaybackSettings) -> anyhow::Result<()> {
    let mut table = HrirTable::read_wav(input)
        .with_context(|| format!("failed to read impulse responses from {}", input.display()))?;
    let report = CorrectionPipeline::new(settings.processing).run(&mut table)?;
    table.write_wav(output, &STANDARD_TRACK_ORDER)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("earprint=info,earprint_core=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("play") => play(settings_from(args.get(1))),
        Some("convolve") if args.len() >= 3 => convolve(
            Path::new(&args[1]),
            Path::new(&args[2]),
            settings_from(args.get(3)),
        ),
        Some("correct") if args.len() >= 3 => correct(
            Path::new(&args[1]),
            Path::new(&args[2]),
            settings_from(args.get(3)),
        ),
        Some("devices") => {
            println!("{}", serde_json::to_string_pretty(&list_devices())?);
            Ok(())
        }
        Some("--help" | "-h") => {
            println!("{USAGE}");
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}
