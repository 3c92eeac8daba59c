use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use beatline_domain::{load_song_file, SessionPhase, Song, TrainerSettings};
use beatline_engine::{EngineEvent, ModeKind, PerformanceReport, SessionLog, TrainerEngine};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Perform,
    SpeedUp,
}

impl From<ModeArg> for ModeKind {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Perform => ModeKind::Perform,
            ModeArg::SpeedUp => ModeKind::SpeedUp,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Auto-play a Beatline session and print the session log"
)]
struct Args {
    /// MusicXML or JSON song file
    song: Option<PathBuf>,
    /// YAML or JSON trainer settings
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "perform")]
    mode: ModeArg,
    /// Play the generated speed-up drill instead of a song file
    #[arg(long)]
    drill: bool,
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    /// Press this many milliseconds after each arrival (negative = early)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_ms: f64,
    /// Deliberately skip every Nth note; 0 plays everything
    #[arg(long, default_value_t = 0)]
    miss_every: usize,
    #[arg(long, default_value_t = 600.0)]
    max_seconds: f64,
}

#[derive(Serialize)]
struct SimulationReport<'a> {
    mode: ModeKind,
    final_bpm: f32,
    score: u64,
    grade: char,
    performance: PerformanceReport,
    log: &'a SessionLog,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.fps <= 0.0 {
        bail!("--fps must be positive");
    }

    let settings = match &args.settings {
        Some(path) => TrainerSettings::load(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => TrainerSettings::default(),
    };
    let song = load_song(&args)?;
    info!(title = %song.title, notes = song.notes.len(), "starting simulation");

    let mut engine = TrainerEngine::new(settings);
    engine.load_song(song);
    engine.set_mode(args.mode.into());
    simulate(&mut engine, &args);

    let report = SimulationReport {
        mode: args.mode.into(),
        final_bpm: engine.session_log().stats.final_bpm,
        score: engine.score().score,
        grade: engine.score().grade(),
        performance: engine.score().report(),
        log: engine.session_log(),
    };
    info!(summary = %engine.session_log().summary(), "simulation finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_song(args: &Args) -> Result<Song> {
    if args.drill {
        return Ok(Song::speed_up_drill(60.0));
    }
    let Some(path) = &args.song else {
        bail!("a song path is required unless --drill is given");
    };
    load_song_file(path).with_context(|| format!("loading song {}", path.display()))
}

fn simulate(engine: &mut TrainerEngine, args: &Args) {
    let dt = 1.0 / args.fps;
    let offset = args.offset_ms / 1000.0;
    let mut decided: HashSet<u32> = HashSet::new();
    let mut seen = 0usize;

    engine.start_game();
    while engine.phase() == SessionPhase::Playing && engine.clock() < args.max_seconds {
        engine.tick(dt);
        let clock = engine.clock();
        let due: Vec<(u32, String)> = engine
            .travel_view()
            .into_iter()
            .filter(|view| !view.hit && !view.missed && clock >= view.arrival + offset)
            .map(|view| (view.sequence_position, view.lane))
            .collect();
        for (position, lane) in due {
            if !decided.insert(position) {
                continue;
            }
            seen += 1;
            if args.miss_every > 0 && seen % args.miss_every == 0 {
                debug!(position, "skipping note");
                continue;
            }
            if engine.press(&lane).is_match() {
                engine.release(&lane);
            }
        }
        for event in engine.drain_events() {
            match event {
                EngineEvent::SpeedUpTriggered { target_bpm } => {
                    info!(clock, target_bpm, "speed-up triggered")
                }
                EngineEvent::Session(change) => info!(to = ?change.to, clock, "session phase"),
                _ => {}
            }
        }
    }
    engine.end_session();
}
