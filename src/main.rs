use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sonic_link_core::{
    audio::{CpalCapture, CpalOutput},
    encode_frame, encode_image,
    modem::{EngineParams, ModemSession},
    receive::Receiver,
    tap::SpectrumTap,
    transmit::{Transmission, Transmitter},
    Frame, MfskEngine, ProtocolId, CAPTURE_BLOCK_SIZE, DEFAULT_VOLUME,
};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

#[derive(Parser)]
#[command(name = "sonic-link")]
#[command(about = "Send text and tiny images over a near-ultrasonic audio link", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a text message
    Send {
        /// Text to send (if not provided, reads from stdin)
        #[arg(short, long)]
        data: Option<String>,

        /// Modem protocol id (0-2 audible, 3-5 ultrasonic)
        #[arg(long, default_value_t = ProtocolId::DEFAULT.0)]
        protocol: u8,

        /// Volume level (0 - 100)
        #[arg(long, default_value_t = DEFAULT_VOLUME)]
        volume: u8,
    },

    /// Send an image as a 64x64 monochrome thumbnail
    SendImage {
        /// Image file (PNG or JPEG)
        path: PathBuf,

        #[arg(long, default_value_t = ProtocolId::DEFAULT.0)]
        protocol: u8,

        #[arg(long, default_value_t = DEFAULT_VOLUME)]
        volume: u8,
    },

    /// Listen for messages until interrupted
    Listen {
        /// Protocol id the decoder expects
        #[arg(long, default_value_t = ProtocolId::DEFAULT.0)]
        protocol: u8,

        /// Directory to write received images to
        #[arg(long, default_value = ".")]
        save_dir: PathBuf,

        /// Exit after this many messages
        #[arg(long)]
        count: Option<usize>,
    },

    /// List available audio devices
    Devices,

    /// Encode a message and decode it again without audio hardware
    Loopback {
        #[arg(default_value = "Hello, Sonic-Link!")]
        message: String,

        #[arg(long, default_value_t = ProtocolId::DEFAULT.0)]
        protocol: u8,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send { data, protocol, volume } => {
            let text = match data {
                Some(d) => d,
                None => {
                    let mut buffer = String::new();
                    io::stdin().read_to_string(&mut buffer)?;
                    buffer
                }
            };

            if text.is_empty() {
                bail!("No data to send");
            }

            send(encode_frame(&Frame::Text(text)), ProtocolId(protocol), volume)?;
        }

        Commands::SendImage { path, protocol, volume } => {
            let source = image::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            send(encode_image(&source), ProtocolId(protocol), volume)?;
        }

        Commands::Listen {
            protocol,
            save_dir,
            count,
        } => {
            listen(ProtocolId(protocol), &save_dir, count)?;
        }

        Commands::Devices => {
            let devices = sonic_link_core::audio::list_audio_devices();
            println!("Available audio devices:");
            for device in devices {
                println!("  {}", device);
            }
        }

        Commands::Loopback { message, protocol } => {
            loopback(&message, ProtocolId(protocol))?;
        }
    }

    Ok(())
}

fn session_for(protocol: ProtocolId) -> ModemSession {
    let params = EngineParams {
        rx_protocol: protocol,
        ..Default::default()
    };
    ModemSession::new(Box::new(MfskEngine::new()), params)
}

fn send(wire: String, protocol: ProtocolId, volume: u8) -> Result<()> {
    eprintln!("Sending {} byte frame...", wire.len());

    let session = session_for(protocol);
    let sample_rate = session.params().sample_rate_out;
    let tap = Arc::new(SpectrumTap::new(sample_rate));
    let output = CpalOutput::new()?.with_tap(Arc::clone(&tap));

    let transmitter = Transmitter::new(session, Arc::new(output));
    let transmission = Transmission::new(wire).with_protocol(protocol).with_volume(volume);

    let playback = transmitter.transmit(&transmission)?;
    eprintln!("Audio duration: {:.1} s", playback.samples() as f32 / sample_rate as f32);
    playback.wait()?;

    if let Some((freq, _)) = tap.peak() {
        log::debug!("Last output spectrum peak at {:.0} Hz", freq);
    }
    eprintln!("Transmission complete!");

    Ok(())
}

fn listen(protocol: ProtocolId, save_dir: &std::path::Path, count: Option<usize>) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Frame>();
    let tap = Arc::new(SpectrumTap::new(sonic_link_core::SAMPLE_RATE));

    let mut receiver = Receiver::new(
        session_for(protocol),
        Arc::new(CpalCapture::new()?),
        Arc::new(move |frame: Frame| {
            let _ = tx.send(frame);
        }),
    )
    .with_tap(Arc::clone(&tap));

    receiver.start()?;
    eprintln!("Listening (protocol {})... press Ctrl-C to stop", protocol);

    let mut received = 0usize;
    for frame in rx.iter() {
        received += 1;
        match frame {
            Frame::Text(text) => println!("{}", text),
            Frame::Raw(raw) => println!("[raw] {}", raw),
            Frame::Image(bitmap) => {
                let path = save_dir.join(format!("received-{received:03}.png"));
                bitmap.save_png(&path)?;
                println!("[image] {} ({} lit pixels)", path.display(), bitmap.count_set());
            }
            Frame::Corrupt(_) => println!("[corrupted image data]"),
        }

        if let Some((freq, _)) = tap.peak() {
            log::debug!("Spectrum peak at {:.0} Hz", freq);
        }

        if count.is_some_and(|limit| received >= limit) {
            break;
        }
    }

    receiver.stop();
    Ok(())
}

fn loopback(message: &str, protocol: ProtocolId) -> Result<()> {
    let session = session_for(protocol);
    let modem = session.acquire()?;

    let wire = encode_frame(&Frame::text(message));
    let samples = modem
        .encode(&wire, protocol, 50)
        .context("Modem produced no waveform")?;

    println!("Frame: {} bytes", wire.len());
    println!("Audio samples: {}", samples.len());
    println!(
        "Duration: {:.1} ms",
        samples.len() as f32 * 1000.0 / session.params().sample_rate_out as f32
    );

    let silence = vec![0.0f32; CAPTURE_BLOCK_SIZE];
    let mut decoded = None;
    for block in samples.chunks(CAPTURE_BLOCK_SIZE).chain(std::iter::once(&silence[..])) {
        if let Some(message) = modem.decode(block) {
            decoded = Some(message);
        }
    }

    let decoded = decoded.context("Demodulation failed")?;
    println!("\nDecoded frame: {}", decoded);

    if decoded == wire {
        println!("\n✓ Test PASSED: Messages match!");
    } else {
        eprintln!("\n✗ Test FAILED: Messages don't match!");
        std::process::exit(1);
    }

    Ok(())
}
