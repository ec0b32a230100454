//! CLI subcommands for the `ember-cli` binary.
//!
//! ## Usage
//!
//! ```bash
//! ember-cli tokenize --vocab vocab.json --text "Hello World"
//! ember-cli detokenize --vocab vocab.json --tokens 1,11,12
//! ember-cli complete --vocab vocab.json --prompt "The quick" --stream
//! ember-cli config show
//! ```

pub mod completion_cmd;
pub mod config_cmd;

/// Exit code for success.
pub const EXIT_OK: u8 = 0;
/// Exit code for a failed command.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for bad arguments or configuration.
pub const EXIT_USAGE: u8 = 2;

/// Value following the flag at `args[i]`.
pub fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("Missing value for {}", args[i]))
}

/// Parse the value following the flag at `args[i]`.
pub fn parse_flag<T: std::str::FromStr>(args: &[String], i: usize) -> Result<T, String> {
    let raw = flag_value(args, i)?;
    raw.parse::<T>()
        .map_err(|_| format!("Invalid value for {}: {}", args[i], raw))
}
