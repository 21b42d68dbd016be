use anyhow::{bail, Context, Result};
use std::env;

use tapecast::export::export_to_wav;
use tapecast::loader::load_file;
use tapecast::player::{Player, PlayerEvent};
use tapecast::Tape;

fn print_usage() {
    println!("tapecast - ZX Spectrum tape image player");
    println!();
    println!("Usage: tapecast [OPTIONS] <FILE.tap|FILE.tzx|FILE.tsx|FILE.cdt>");
    println!();
    println!("Options:");
    println!("  -l, --list         List the decoded blocks (default action)");
    println!("  -w, --wav <OUT>    Render the tape to a 44.1 kHz stereo WAV file");
    println!("  -b, --block <N>    Start from block N instead of the beginning");
    println!("  -p, --play         Play through the default audio device");
    println!("                     (requires the \"streaming\" feature)");
    println!("  -h, --help         Show this help");
}

fn list_blocks(tape: &Tape) {
    println!(
        "{} \"{}\" - {} bytes, {} blocks",
        match tape.kind {
            tapecast::TapeKind::Tap => "TAP",
            tapecast::TapeKind::Tzx => "TZX",
        },
        tape.name,
        tape.size,
        tape.num_blocks()
    );
    println!();

    for block in &tape.blocks {
        let name = block.name.as_deref().unwrap_or("");
        let marker = if block.playable() { ' ' } else { '-' };
        println!(
            "[{:3}]{} offset {:6}  size {:6}  {:<26} {}",
            block.index,
            marker,
            block.offset,
            block.size,
            block.type_name(),
            name
        );
    }
}

#[cfg(feature = "streaming")]
fn stream_play(player: &mut Player<std::fs::File>) -> Result<()> {
    use tapecast::streaming::{AudioDevice, StreamConfig, StreamingSink};

    let config = StreamConfig::stable(tapecast::consts::DEFAULT_SAMPLE_RATE);
    let mut sink = StreamingSink::new(config);
    let _device =
        AudioDevice::new(config, sink.buffer()).context("opening the audio device")?;

    let control = player.control();
    ctrlc_handler(control.clone());

    control.request_play();
    let state = player.play(&mut sink)?;
    println!("playback finished: {:?}", state);
    Ok(())
}

#[cfg(feature = "streaming")]
fn ctrlc_handler(control: tapecast::TapeControl) {
    // Best effort: without a signal hook crate, fall back to letting the
    // process die. A second thread watching stdin gives us a stop button.
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            control.request_stop();
        }
    });
}

#[cfg(not(feature = "streaming"))]
fn stream_play(_player: &mut Player<std::fs::File>) -> Result<()> {
    bail!("built without the \"streaming\" feature; use --wav or rebuild with --features streaming");
}

fn main() -> Result<()> {
    let mut file_arg: Option<String> = None;
    let mut wav_out: Option<String> = None;
    let mut start_block = 0usize;
    let mut do_play = false;
    let mut do_list = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-l" | "--list" => do_list = true,
            "-w" | "--wav" => {
                wav_out = Some(args.next().context("--wav needs an output path")?);
            }
            "-b" | "--block" => {
                start_block = args
                    .next()
                    .context("--block needs a number")?
                    .parse()
                    .context("--block needs a number")?;
            }
            "-p" | "--play" => do_play = true,
            other if other.starts_with('-') => bail!("unknown option {}", other),
            other => file_arg = Some(other.to_string()),
        }
    }

    let Some(path) = file_arg else {
        print_usage();
        bail!("no input file given");
    };

    let (tape, source) = load_file(&path).with_context(|| format!("loading {}", path))?;

    if do_list || (!do_play && wav_out.is_none()) {
        list_blocks(&tape);
        if !do_play && wav_out.is_none() {
            return Ok(());
        }
    }

    let mut player = Player::new(tape, source);
    player.select_block(start_block);
    player.on_event(Box::new(|event| {
        if let PlayerEvent::BlockStarted {
            index,
            name,
            type_name,
            ..
        } = event
        {
            println!(
                "> block {:3}  {:<26} {}",
                index,
                type_name,
                name.as_deref().unwrap_or("")
            );
        }
    }));

    if let Some(out) = wav_out {
        player.control().request_play();
        export_to_wav(&mut player, &out).with_context(|| format!("writing {}", out))?;
        println!("wrote {}", out);
    }

    if do_play {
        stream_play(&mut player)?;
    }

    Ok(())
}
