// crates/tapedeck-player/src/app.rs
//
// Player: owns the loaded file's whole runtime (frame index, audio engine,
// the three decoder managers, the speed controller thread) and runs the
// render loop. All command producers (keyboard, remote, menu) funnel into
// apply_command() so their semantics cannot drift apart.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use tapedeck_core::commands::{Command, MemoryMarkers, SpeedLadder};
use tapedeck_core::state::PlaybackState;
use tapedeck_core::timecode::parse_timecode;

use tapedeck_media::audio::{output_devices, AudioEngine};
use tapedeck_media::cache;
use tapedeck_media::decode::cached::CachedDecoder;
use tapedeck_media::decode::full_res::FullResDecoder;
use tapedeck_media::decode::low_res::LowResDecoder;
use tapedeck_media::index::{build_frame_index, find_slot_by_time_ms, SharedIndex};
use tapedeck_media::manage::plan::{cached_segment_size, full_res_window_size};
use tapedeck_media::manage::{CachedManager, FullResManager, LowCachedManager};
use tapedeck_media::probe::{probe_duration, probe_fps};
use tapedeck_media::select::FrameSelector;

use crate::controller;
use crate::driver::{pace_until, DeepPause};
use crate::sink::VideoSink;

pub struct Player {
    pub state:      Arc<PlaybackState>,
    pub markers:    MemoryMarkers,
    pub fps:        f64,
    pub duration:   f64,
    path:           PathBuf,
    slots:          SharedIndex,
    audio:          AudioEngine,
    low_manager:    LowCachedManager,
    cached_manager: CachedManager,
    full_manager:   FullResManager,
    controller:     Option<JoinHandle<()>>,
    selector:       FrameSelector,
    ladder:         SpeedLadder,
}

impl Player {
    /// Full load sequence: probe, index, companion lookup, audio engine,
    /// decoders, managers, controller. Any failure here surfaces to the
    /// caller and the player returns to the no-file state; nothing below
    /// this layer ever reports load errors again.
    pub fn load(path: &Path, volume: f64, markers: MemoryMarkers) -> Result<Self> {
        let state = Arc::new(PlaybackState::new());
        state.volume.store(volume.clamp(0.0, 1.0));

        let fps = probe_fps(path);
        let duration = probe_duration(path);
        state.fps.store(fps);
        state.total_duration.store(duration);
        eprintln!("[player] {:.3} fps, {:.1}s ← {}", fps, duration, path.display());

        let slots: SharedIndex = Arc::new(build_frame_index(path)?);

        // The companion is produced by an external transcode; without one,
        // the low and cached tiers decode the source itself (slower, but
        // the player stays usable).
        let companion = cache::find_low_res_companion(path).unwrap_or_else(|| {
            eprintln!("[player] no low-res companion in cache, low tiers will use the source");
            path.to_path_buf()
        });

        let audio = AudioEngine::start(path, Arc::clone(&state))?;

        let window_size = full_res_window_size(fps);
        let full_decoder = FullResDecoder::open(path)
            .with_context(|| format!("full-res decoder for {}", path.display()))?;
        let cached_decoder = CachedDecoder::open(&companion, fps)
            .with_context(|| format!("cached decoder for {}", companion.display()))?;
        let low_decoder = LowResDecoder::new(&companion);

        let low_manager = LowCachedManager::spawn(
            low_decoder,
            Arc::clone(&slots),
            Arc::clone(&state),
            window_size,
        );
        let cached_manager = CachedManager::spawn(
            cached_decoder,
            Arc::clone(&slots),
            Arc::clone(&state),
            cached_segment_size(fps),
        );
        let full_manager = FullResManager::spawn(
            full_decoder,
            Arc::clone(&slots),
            Arc::clone(&state),
            window_size,
        );

        let controller = controller::spawn(Arc::clone(&state));

        Ok(Self {
            state,
            markers,
            fps,
            duration,
            path: path.to_path_buf(),
            slots,
            audio,
            low_manager,
            cached_manager,
            full_manager,
            controller: Some(controller),
            selector: FrameSelector::new(),
            ladder: SpeedLadder::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The render loop: drain commands, derive the slot index from the
    /// audio clock, notify managers on movement, select and present a
    /// frame, pace to the budget.
    pub fn run(&mut self, commands: Receiver<Command>, sink: &mut dyn VideoSink) {
        let mut deep_pause = DeepPause::new();

        while !self.state.should_exit.load(Ordering::Acquire) {
            let tick_start = Instant::now();

            let mut had_command = false;
            while let Ok(cmd) = commands.try_recv() {
                had_command = true;
                self.apply_command(cmd);
            }
            if had_command {
                deep_pause.interrupt();
            }

            // The audio clock is authoritative; video follows.
            let now_s = self.state.current_time.load();
            let target_ms = (now_s * 1000.0) as i64;
            let index = find_slot_by_time_ms(&self.slots, target_ms);
            if index != self.state.current_frame.load(Ordering::Acquire) {
                self.state.current_frame.store(index, Ordering::Release);
                self.notify_managers();
            }

            let force = self.state.seek_requested.swap(false, Ordering::AcqRel);
            if force {
                self.notify_managers();
                deep_pause.interrupt();
            }

            let rate = self.state.playback_rate.load();
            deep_pause.update(rate, self.state.target_rate.load());

            let signed_rate = if self.state.is_reverse.load(Ordering::Acquire) {
                -rate
            } else {
                rate
            };
            match self.selector.select(&self.slots, index, signed_rate, force) {
                Some(frame) => sink.present(&frame, now_s),
                None => sink.starved(now_s),
            }

            pace_until(tick_start + deep_pause.frame_budget());
        }
    }

    pub fn apply_command(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePause => {
                if self.state.playback_rate.load().abs() > 1.1 {
                    // Space out of a shuttle means "back to normal", not
                    // pause; the gate stays raised until the ramp settles.
                    self.state.reset_to_normal_speed();
                    self.ladder.reset();
                } else {
                    self.state.toggle_pause();
                }
            }
            Command::PlayForward => {
                self.state.target_rate.store(1.0);
                self.state.is_reverse.store(false, Ordering::Release);
            }
            Command::ToggleReverse => {
                let was = self.state.is_reverse.load(Ordering::Acquire);
                self.state.is_reverse.store(!was, Ordering::Release);
            }
            Command::SpeedUp => {
                let rate = self.ladder.step_up();
                self.state.target_rate.store(rate);
            }
            Command::SpeedDown => {
                let rate = self.ladder.step_down();
                self.state.target_rate.store(rate);
            }
            Command::JogForward => self.state.start_jog_forward(),
            Command::JogBackward => self.state.start_jog_backward(),
            Command::JogRelease => self.state.stop_jog(),
            Command::SeekTimecode(entry) => match parse_timecode(&entry, self.fps) {
                Ok(t) => self.audio.seek(t),
                Err(e) => eprintln!("[player] timecode \"{entry}\": {e}"),
            },
            Command::SeekSeconds(t) => self.audio.seek(t),
            Command::VolumeUp => self.state.increase_volume(),
            Command::VolumeDown => self.state.decrease_volume(),
            Command::SetMarker(i) => {
                let t = self.state.current_time.load();
                self.markers.set(i, t);
                eprintln!("[player] marker {} set at {t:.3}s", i + 1);
            }
            Command::JumpToMarker(i) => {
                if let Some(t) = self.markers.get(i) {
                    self.audio.seek(t);
                }
            }
            Command::SwitchAudioDevice(name) => {
                if let Err(e) = self.audio.switch_device(&name) {
                    eprintln!("[player] device switch failed: {e}");
                    eprintln!("[player] available: {:?}", output_devices());
                }
            }
            Command::Quit => {
                self.state.should_exit.store(true, Ordering::Release);
            }
        }
    }

    fn notify_managers(&self) {
        self.full_manager.notify_frame_change();
        self.low_manager.notify_frame_change();
        self.cached_manager.notify_frame_change();
    }

    /// Teardown order matters: managers first (they drive the decoders),
    /// then the speed controller, then the audio engine (silence → stream →
    /// decode thread → temp file).
    pub fn shutdown(mut self) {
        self.state.should_exit.store(true, Ordering::Release);
        self.low_manager.stop();
        self.cached_manager.stop();
        self.full_manager.stop();
        if let Some(c) = self.controller.take() {
            let _ = c.join();
        }
        self.audio.shutdown();
        eprintln!("[player] shut down");
    }
}
