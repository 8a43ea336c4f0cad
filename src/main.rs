use anyhow::{Context, Result};
use clap::Parser;
use shocklog_lib::capture::{list_input_devices, AudioSource, DeviceSource, ToneSource};
use shocklog_lib::recorder::{Logger, OutputFormat};
use shocklog_lib::{Settings, Shell};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// How often pending logger events are applied to the view
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Width of each meter bar on the status line
const METER_WIDTH: usize = 20;

#[derive(Parser)]
#[command(name = "shocklog", version)]
#[command(about = "continuous audio logger: records the input device into rolling segments")]
struct Cli {
    /// settings file (defaults to the platform config directory)
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,

    /// mp3 bitrate in kbit/s
    #[arg(long)]
    bitrate: Option<u32>,

    /// segment length in minutes
    #[arg(long)]
    length: Option<u32>,

    /// output folder
    #[arg(long)]
    folder: Option<String>,

    /// write segments into YYYY/MM/DD sub-folders
    #[arg(long, value_name = "bool")]
    organise: Option<bool>,

    /// delete old segments
    #[arg(long, value_name = "bool")]
    delete_old: Option<bool>,

    /// retention window, in the configured unit
    #[arg(long)]
    delete_time: Option<u32>,

    /// output format (mp3 or wav)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// input device name
    #[arg(long)]
    device: Option<String>,

    /// list input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// print the device list as json
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// record a generated test tone instead of an input device
    #[arg(long)]
    test_tone: bool,

    /// do not start logging on launch
    #[arg(long)]
    idle: bool,
}

impl Cli {
    /// Overrides become the new persisted settings, like edits in the options
    fn apply(&self, settings: &mut Settings) {
        if let Some(bitrate) = self.bitrate {
            settings.bitrate = bitrate;
        }
        if let Some(length) = self.length {
            settings.length = length;
        }
        if let Some(folder) = &self.folder {
            settings.folder = folder.clone();
        }
        if let Some(organise) = self.organise {
            settings.organise_folder = organise;
        }
        if let Some(delete_old) = self.delete_old {
            settings.delete_old = delete_old;
        }
        if let Some(delete_time) = self.delete_time {
            settings.delete_time = delete_time;
        }
        if let Some(format) = self.format {
            settings.format = format;
        }
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
    }
}

fn draw(shell: &Shell) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\r\x1b[2K{}", shell.view().status_line(METER_WIDTH));
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    shocklog_lib::init_tracing();

    if cli.list_devices {
        let devices = list_input_devices();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else {
            println!("\ninput devices");
            println!("========================================");
            for device in &devices {
                let marker = if device.is_default { "*" } else { " " };
                println!("{} {}", marker, device.name);
            }
            println!("========================================\n");
        }
        return Ok(());
    }

    info!("starting shocklog v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::config_path()?,
    };
    let mut settings = Settings::load_or_create_at(&config_path)
        .with_context(|| format!("Failed to load settings from {:?}", config_path))?;
    cli.apply(&mut settings);

    let source: Box<dyn AudioSource> = if cli.test_tone {
        Box::new(ToneSource::default())
    } else {
        Box::new(DeviceSource::new(settings.device.clone()))
    };
    let (logger, events) = Logger::new(source);
    let mut shell = Shell::new(logger, events, settings);

    info!("capture source: {}", shell.logger().source_name());
    println!("shocklog: Enter toggles logging, q quits");
    if !cli.idle {
        if let Err(e) = shell.toggle() {
            tracing::error!(code = e.code(), "Failed to start logging: {}", e);
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                shell.pump();
                draw(&shell);
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(Some(_)) => {
                    if let Err(e) = shell.toggle() {
                        tracing::error!(code = e.code(), "Toggle failed: {}", e);
                    }
                    draw(&shell);
                }
                // Detached from a terminal: keep logging until Ctrl-C
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }
    println!();

    let settings = shell.shutdown();
    settings
        .save_to(&config_path)
        .with_context(|| format!("Failed to save settings to {:?}", config_path))?;
    info!("settings saved to {:?}", config_path);

    Ok(())
}
