//! Ember CORE command-line entry point.
//!
//! ## CLI Subcommands
//!
//! - `ember-cli tokenize` - Tokenize text with a model's vocabulary
//! - `ember-cli detokenize` - Turn token ids back into text
//! - `ember-cli complete` - Run a completion (buffered or streamed)
//! - `ember-cli config` - Show, list defaults, or validate settings

use std::process::ExitCode;

use ember_core::cli::{completion_cmd, config_cmd, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use ember_core::config as ember_config;
use ember_core::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if let Err(e) = telemetry::init_logging(&ember_config::load_log_config()) {
        eprintln!("Logging disabled: {}", e);
    }
    telemetry::init_metrics();

    match command {
        "tokenize" => ExitCode::from(completion_cmd::run_tokenize(&args)),
        "detokenize" => ExitCode::from(completion_cmd::run_detokenize(&args)),
        "complete" => ExitCode::from(completion_cmd::run_complete(&args).await),
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let config_file = match config_file_arg(&args) {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            match subcommand {
                "show" => ExitCode::from(config_cmd::run_show(config_file)),
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::from(EXIT_OK)
                }
                "validate" => ExitCode::from(config_cmd::run_validate(config_file)),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::from(EXIT_USAGE)
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::from(EXIT_OK)
        }
        "version" | "--version" | "-V" => {
            println!("ember-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::from(EXIT_OK)
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// `--config FILE` anywhere after the config subcommand.
fn config_file_arg(args: &[String]) -> Result<Option<&str>, String> {
    match args.iter().skip(3).position(|a| a == "--config") {
        Some(offset) => ember_core::cli::flag_value(args, offset + 3).map(Some),
        None => Ok(None),
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "ember-cli - stateful text completion v{}

USAGE:
    ember-cli [COMMAND] [OPTIONS]

COMMANDS:
    tokenize     Tokenize text and print token ids as JSON
    detokenize   Decode token ids and print the text
    complete     Run a completion and print the result as JSON
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

MODEL OPTIONS:
    --vocab FILE   JSON vocabulary (tokenize/detokenize only, no weights)
    --model FILE   GGUF model (requires the `gguf` feature)
    --config FILE  Load settings from a TOML file instead of EMBER_* variables

EXAMPLES:
    ember-cli tokenize --vocab vocab.json --text \"Hello World\"
    ember-cli detokenize --vocab vocab.json --tokens 1,11,12
    ember-cli complete --model model.gguf --prompt \"The quick\" --max-tokens 32
    ember-cli complete --model model.gguf --prompt \"Q:\" --stop \"\\n\" --stream
    ember-cli config validate --config ember.toml

ENVIRONMENT:
    EMBER_N_CTX          Context window in tokens (0 = model maximum)
    EMBER_LONG_PROMPT    truncate or reject prompts longer than the window
    EMBER_MAX_TOKENS     Default completion length
    EMBER_LOG            Log filter (error, warn, info, debug, trace)
    EMBER_LOG_FORMAT     pretty or json

EXIT CODES:
    0  Success
    1  Failure
    2  Usage or configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "tokenize" => {
            eprintln!(
                "ember-cli tokenize - Tokenize text

USAGE:
    ember-cli tokenize (--vocab FILE | --model FILE) --text TEXT [--no-bos]

OPTIONS:
    --text TEXT  Text to tokenize
    --no-bos     Do not prepend the beginning-of-sequence token

EXAMPLES:
    ember-cli tokenize --vocab vocab.json --text \"Hello World\"
"
            );
        }
        "detokenize" => {
            eprintln!(
                "ember-cli detokenize - Decode token ids

USAGE:
    ember-cli detokenize (--vocab FILE | --model FILE) --tokens IDS

OPTIONS:
    --tokens IDS  Comma-separated token ids

DESCRIPTION:
    Special tokens decode to nothing. Invalid UTF-8 is replaced.

EXAMPLES:
    ember-cli detokenize --vocab vocab.json --tokens 1,11,12
"
            );
        }
        "complete" => {
            eprintln!(
                "ember-cli complete - Run a completion

USAGE:
    ember-cli complete (--vocab FILE | --model FILE) --prompt TEXT [OPTIONS]

OPTIONS:
    --max-tokens N        Maximum completion tokens
    --temperature F       Sampling temperature (0 = greedy)
    --top-k N             Keep the N most likely tokens (0 = all)
    --top-p F             Nucleus sampling threshold in [0, 1]
    --repeat-penalty F    Penalty for recently seen tokens
    --repeat-last-n N     Window for the repeat penalty
    --stop TEXT           Stop sequence (repeatable)
    --seed N              Seed for reproducible sampling
    --echo                Include the prompt in the output
    --stream              Print one JSON object per fragment

DESCRIPTION:
    The completion ends at a stop sequence, the end-of-sequence token,
    or when max tokens are generated. The final object carries
    finish_reason, usage, and any warning about the prompt.

EXAMPLES:
    ember-cli complete --model model.gguf --prompt \"The quick\" --stop .
    ember-cli complete --model model.gguf --prompt \"Once\" --stream --seed 7
"
            );
        }
        "config" => {
            eprintln!(
                "ember-cli config - Manage configuration

USAGE:
    ember-cli config <SUBCOMMAND> [--config FILE]

SUBCOMMANDS:
    show      Show the effective settings
    defaults  Show the built-in defaults
    validate  Validate settings and warn about odd combinations

EXAMPLES:
    ember-cli config show
    ember-cli config validate --config ember.toml
"
            );
        }
        "version" => {
            eprintln!(
                "ember-cli version - Show version information

USAGE:
    ember-cli version
"
            );
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!();
            print_usage();
        }
    }
}
