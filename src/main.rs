use anyhow::{Context, Result, bail};
use bookworm_speech::{
    config::{Config, ReadingMode},
    platform,
    profiles::{PROFILE_DIR, ProfileSettings, VoiceProfileManager},
    service::{Page, ReadingEvent, SpeechService},
    speech::{Engine, Registry, SynthState},
};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

/// Speak text with Bookworm's speech engines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to speech.json in the Bookworm config directory)
    #[arg(long, env = "BOOKWORM_SPEECH_CONFIG")]
    config: Option<PathBuf>,

    /// Program speaking the speech server protocol, overriding the settings
    #[arg(long, env = "BOOKWORM_SPEECH_PROGRAM")]
    speech_program: Option<PathBuf>,

    /// Engine to use instead of the configured one
    #[arg(short, long)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the engines this build knows about
    Engines,

    /// List the voices of the engine, best matches first
    Voices {
        /// Only voices speaking this language
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Read text aloud and wait until it is done
    Speak {
        /// Read this file instead of the arguments (`-` for stdin)
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Language of the text; picks a matching voice if needed
        #[arg(short, long)]
        language: Option<String>,

        /// Apply this voice profile first
        #[arg(short, long)]
        profile: Option<String>,

        /// Character offset of the caret; reading starts here unless the
        /// settings say to start from the top of the page
        #[arg(long, default_value_t = 0)]
        caret: usize,

        text: Vec<String>,
    },

    /// Manage voice profiles
    Profiles {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    List,

    Create {
        name: String,

        /// Start from the current speech settings instead of an empty profile
        #[arg(long)]
        from_current: bool,
    },

    Delete {
        name: String,
    },

    /// Apply a profile to the saved speech settings
    Activate {
        name: String,
    },
}

fn main() -> Result<()> {
    // stdout is for command output; logs go to stderr.
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let mut config = Config::load(&config_path)?;
    if let Some(program) = cli.speech_program {
        config.backends.speech_program = Some(program);
    }
    if let Some(engine) = cli.engine {
        config.speech.engine = engine;
    }
    let profile_dir = config_path
        .parent()
        .map_or_else(|| PathBuf::from(PROFILE_DIR), |dir| dir.join(PROFILE_DIR));

    match cli.command {
        Command::Engines => list_engines(&config),
        Command::Voices { language } => list_voices(config, language.as_deref()),
        Command::Speak {
            file,
            language,
            profile,
            caret,
            text,
        } => {
            if let Some(profile) = profile {
                VoiceProfileManager::open(&profile_dir)?.activate(&profile, &mut config.speech)?;
            }
            let text = match file {
                Some(path) => read_text(&path)?,
                None => text.join(" "),
            };
            if text.trim().is_empty() {
                bail!("nothing to speak");
            }
            speak(config, text, language, caret)
        }
        Command::Profiles { command } => {
            manage_profiles(command, &profile_dir, &config, &config_path)
        }
    }
}

fn list_engines(config: &Config) -> Result<()> {
    let registry = Registry::with_defaults(&config.backends);
    for kind in registry.kinds() {
        let status = if kind.check() { "available" } else { "unavailable" };
        println!("{}\t{}\t{}", kind.name, kind.display_name, status);
    }
    Ok(())
}

fn start_service(config: Config) -> Result<SpeechService> {
    let registry = Registry::with_defaults(&config.backends);
    let mut service = SpeechService::new(registry, config);
    service
        .initialize_engine()
        .context("initialize speech engine")?;
    Ok(service)
}

fn list_voices(config: Config, language: Option<&str>) -> Result<()> {
    let service = start_service(config)?;
    let Some(engine) = service.engine() else {
        bail!("no speech engine");
    };
    let current = engine.voice()?.map(|v| v.id);
    for voice in engine.voices_by_language(language)? {
        let marker = if current.as_deref() == Some(voice.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}\t{}\t{}",
            marker,
            voice.id,
            voice.language,
            voice.display_name()
        );
    }
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("read stdin")?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn speak(mut config: Config, text: String, language: Option<String>, caret: usize) -> Result<()> {
    // One page only; there is nothing to turn to.
    config.reading.reading_mode = ReadingMode::Page;
    let mut service = start_service(config)?;
    if let Some(language) = &language {
        service.try_set_language(language)?;
    }
    let page = Page {
        number: 0,
        text,
        language: language.unwrap_or_else(|| "en".to_string()),
    };
    service.set_caret(caret);
    service.speak_current_page(page)?;
    loop {
        for event in service.poll_events() {
            match event {
                ReadingEvent::SegmentStarted { pos, end } => {
                    log::info!("reading {}..{}", pos, end)
                }
                event => log::debug!("{:?}", event),
            }
        }
        platform::tick_runloop()?;
        if service.state() == SynthState::Idle {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    service.close()?;
    Ok(())
}

fn manage_profiles(
    command: ProfileCommand,
    dir: &Path,
    config: &Config,
    config_path: &Path,
) -> Result<()> {
    let mut manager = VoiceProfileManager::open(dir)?;
    match command {
        ProfileCommand::List => {
            for profile in manager.profiles() {
                let settings =
                    serde_json::to_string(&profile.speech).context("serialize profile")?;
                println!("{}\t{}", profile.name, settings);
            }
        }
        ProfileCommand::Create { name, from_current } => {
            let settings = if from_current {
                ProfileSettings::capture(&config.speech)
            } else {
                ProfileSettings::default()
            };
            manager.create_with(&name, settings)?;
        }
        ProfileCommand::Delete { name } => manager.delete(&name)?,
        ProfileCommand::Activate { name } => {
            // Command line overrides stay out of the saved file.
            let mut saved = Config::load(config_path)?;
            manager.activate(&name, &mut saved.speech)?;
            saved.save(config_path)?;
        }
    }
    Ok(())
}
