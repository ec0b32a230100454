//! Config CLI subcommands: show, defaults, validate.
//!
//! Settings come from `EMBER_*` environment variables, or from a TOML file
//! when `--config FILE` is given.

use super::{EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::config::{self, ConfigError, EngineSettings};

/// Resolve settings from an optional TOML file, else the environment.
pub fn resolve_settings(config_file: Option<&str>) -> Result<EngineSettings, ConfigError> {
    match config_file {
        Some(path) => EngineSettings::load_file(path),
        None => Ok(config::load()),
    }
}

/// Print effective settings as key-value pairs to stdout.
pub fn run_show(config_file: Option<&str>) -> u8 {
    match resolve_settings(config_file) {
        Ok(settings) => {
            print_settings(&settings);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    }
}

/// Print default settings (no env overrides) to stdout.
pub fn run_defaults() {
    print_settings(&EngineSettings::default());
}

/// Validate settings and flag combinations that will surprise at runtime.
///
/// Returns `EXIT_OK` if valid, `EXIT_FAILURE` on warnings, `EXIT_USAGE` on invalid settings.
pub fn run_validate(config_file: Option<&str>) -> u8 {
    let settings = match resolve_settings(config_file).and_then(|s| s.validate().map(|_| s)) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let mut warnings = 0;

    if settings.n_ctx != 0 && settings.defaults.max_tokens >= settings.n_ctx {
        eprintln!(
            "WARNING: EMBER_MAX_TOKENS ({}) >= EMBER_N_CTX ({}); completions will be cut short",
            settings.defaults.max_tokens, settings.n_ctx
        );
        warnings += 1;
    }

    if settings.n_ctx != 0 && settings.n_batch > settings.n_ctx {
        eprintln!(
            "WARNING: EMBER_N_BATCH ({}) > EMBER_N_CTX ({}); batches are capped by the context",
            settings.n_batch, settings.n_ctx
        );
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

/// Render settings in `EMBER_*` form.
pub fn format_settings(settings: &EngineSettings) -> Vec<String> {
    let long_prompt = match settings.long_prompt {
        config::LongPromptPolicy::Truncate => "truncate",
        config::LongPromptPolicy::Reject => "reject",
    };
    let d = &settings.defaults;
    vec![
        format!("EMBER_N_CTX={}", settings.n_ctx),
        format!("EMBER_N_BATCH={}", settings.n_batch),
        format!("EMBER_N_THREADS={}", settings.n_threads),
        format!("EMBER_LONG_PROMPT={}", long_prompt),
        format!("EMBER_PROMPT_CACHE_ENTRIES={}", settings.prompt_cache_entries),
        format!("EMBER_MAX_TOKENS={}", d.max_tokens),
        format!("EMBER_TEMPERATURE={}", d.temperature),
        format!("EMBER_TOP_K={}", d.top_k),
        format!("EMBER_TOP_P={}", d.top_p),
        format!("EMBER_REPEAT_PENALTY={}", d.repetition_penalty),
        format!("EMBER_REPEAT_LAST_N={}", d.repeat_last_n),
    ]
}

fn print_settings(settings: &EngineSettings) {
    for line in format_settings(settings) {
        println!("{}", line);
    }
}
