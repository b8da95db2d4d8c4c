// crates/tapedeck-player/src/main.rs
//
// tapedeck: a tape-transport video scrubbing player.
//
// Usage: tapedeck [file]
//
// With no argument the last opened file is reloaded. Commands arrive on
// stdin, one per line; the same surface a keyboard handler or remote
// control produces (see parse_command for the vocabulary).

mod app;
mod controller;
mod driver;
mod settings;
mod sink;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{bail, Result};
use crossbeam_channel::bounded;

use tapedeck_core::commands::Command;

use app::Player;
use settings::Settings;
use sink::ConsoleSink;

fn main() -> Result<()> {
    ffmpeg_the_third::init()?;

    let settings = Settings::load();
    let path = match std::env::args().nth(1).map(PathBuf::from) {
        Some(p) => p,
        None => match settings.last_file.clone() {
            Some(p) => {
                eprintln!("[player] reopening {}", p.display());
                p
            }
            None => bail!("usage: tapedeck <file>"),
        },
    };

    let mut player = Player::load(&path, settings.volume, settings.markers)?;

    // stdin is the command producer in this build; GUI and remote surfaces
    // send the same Command values through the same channel.
    let (tx, rx) = bounded::<Command>(64);
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(cmd) => {
                        let quit = cmd == Command::Quit;
                        if tx.send(cmd).is_err() || quit {
                            break;
                        }
                    }
                    None => {
                        if !line.trim().is_empty() {
                            eprintln!("[player] unknown command: {line}");
                        }
                    }
                }
            }
        })
        .expect("spawn stdin reader");

    let mut sink = ConsoleSink::new(player.fps, player.duration);
    player.run(rx, &mut sink);

    // Persist what the session changed before tearing down.
    let out = Settings {
        volume:    player.state.volume.load(),
        markers:   player.markers,
        last_file: Some(player.path().to_path_buf()),
    };
    out.save();

    player.shutdown();
    Ok(())
}

/// One line of input → one command. Deliberately terse: these are the deck
/// keys, not a shell.
///
/// | input            | command                       |
/// |------------------|-------------------------------|
/// | `p` / `space`    | play/pause toggle             |
/// | `play`           | 1.0x forward                  |
/// | `up` / `down`    | speed ladder step             |
/// | `r`              | toggle reverse                |
/// | `jf` / `jb` / `j.` | jog forward / backward / release |
/// | `g <HHMMSSFF>`   | seek to timecode              |
/// | `seek <secs>`    | seek to seconds               |
/// | `+` / `-`        | volume                        |
/// | `m1`..`m5`       | set memory marker             |
/// | `1`..`5`         | jump to memory marker         |
/// | `dev <name>`     | switch audio output device    |
/// | `q`              | quit                          |
fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if let Some(tc) = line.strip_prefix("g ") {
        return Some(Command::SeekTimecode(tc.trim().to_string()));
    }
    if let Some(secs) = line.strip_prefix("seek ") {
        return secs.trim().parse().ok().map(Command::SeekSeconds);
    }
    if let Some(name) = line.strip_prefix("dev ") {
        return Some(Command::SwitchAudioDevice(name.trim().to_string()));
    }
    match line {
        "p" | "space" => Some(Command::TogglePause),
        "play" => Some(Command::PlayForward),
        "up" => Some(Command::SpeedUp),
        "down" => Some(Command::SpeedDown),
        "r" => Some(Command::ToggleReverse),
        "jf" => Some(Command::JogForward),
        "jb" => Some(Command::JogBackward),
        "j." => Some(Command::JogRelease),
        "+" => Some(Command::VolumeUp),
        "-" => Some(Command::VolumeDown),
        "m1" | "m2" | "m3" | "m4" | "m5" => {
            let i = line[1..].parse::<usize>().ok()? - 1;
            Some(Command::SetMarker(i))
        }
        "1" | "2" | "3" | "4" | "5" => {
            let i = line.parse::<usize>().ok()? - 1;
            Some(Command::JumpToMarker(i))
        }
        "q" => Some(Command::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deck_keys() {
        assert_eq!(parse_command("p"), Some(Command::TogglePause));
        assert_eq!(parse_command(" space "), Some(Command::TogglePause));
        assert_eq!(parse_command("play"), Some(Command::PlayForward));
        assert_eq!(parse_command("up"), Some(Command::SpeedUp));
        assert_eq!(parse_command("r"), Some(Command::ToggleReverse));
        assert_eq!(parse_command("jf"), Some(Command::JogForward));
        assert_eq!(parse_command("j."), Some(Command::JogRelease));
        assert_eq!(parse_command("q"), Some(Command::Quit));
    }

    #[test]
    fn parses_seeks_and_markers() {
        assert_eq!(
            parse_command("g 01020304"),
            Some(Command::SeekTimecode("01020304".into()))
        );
        assert_eq!(parse_command("seek 12.5"), Some(Command::SeekSeconds(12.5)));
        assert_eq!(parse_command("m3"), Some(Command::SetMarker(2)));
        assert_eq!(parse_command("3"), Some(Command::JumpToMarker(2)));
        assert_eq!(
            parse_command("dev USB Audio"),
            Some(Command::SwitchAudioDevice("USB Audio".into()))
        );
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("frobnicate"), None);
        assert_eq!(parse_command("seek abc"), None);
        assert_eq!(parse_command("9"), None);
    }
}
