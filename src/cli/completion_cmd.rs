//! Tokenize, detokenize and complete subcommands.
//!
//! A model is either a JSON vocabulary (`--vocab FILE`) or, with the `gguf`
//! feature, a GGUF file (`--model FILE`).

use std::sync::Arc;

use super::{flag_value, parse_flag, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::cli::config_cmd::resolve_settings;
use crate::config::EngineSettings;
use crate::engine::{
    spawn_completion, Backend, CompletionError, CompletionResult, GenerationConfig, ModelHandle,
    TokenId, TokenizerAdapter,
};
use crate::models;

/// Where to load the model from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelArgs {
    pub vocab: Option<String>,
    pub model: Option<String>,
    pub config: Option<String>,
}

impl ModelArgs {
    /// Consume a model flag at `args[i]`. Returns the number of args used.
    fn take(&mut self, args: &[String], i: usize) -> Result<Option<usize>, String> {
        match args[i].as_str() {
            "--vocab" => self.vocab = Some(flag_value(args, i)?.to_string()),
            "--model" => self.model = Some(flag_value(args, i)?.to_string()),
            "--config" => self.config = Some(flag_value(args, i)?.to_string()),
            _ => return Ok(None),
        }
        Ok(Some(2))
    }

    fn settings(&self) -> Result<EngineSettings, String> {
        resolve_settings(self.config.as_deref()).map_err(|e| e.to_string())
    }

    fn load_backend(&self, settings: &EngineSettings) -> Result<Arc<dyn Backend>, String> {
        if let Some(path) = &self.vocab {
            let backend = models::load_vocab(path).map_err(|e| e.to_string())?;
            return Ok(Arc::new(backend));
        }
        if let Some(path) = &self.model {
            return load_model(path, settings);
        }
        Err("Either --vocab FILE or --model FILE is required".to_string())
    }
}

#[cfg(feature = "gguf")]
fn load_model(path: &str, settings: &EngineSettings) -> Result<Arc<dyn Backend>, String> {
    let config = crate::engine::GgufConfig::from_settings(settings);
    let backend = models::load_gguf(path, &config).map_err(|e| e.to_string())?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gguf"))]
fn load_model(_path: &str, _settings: &EngineSettings) -> Result<Arc<dyn Backend>, String> {
    Err("GGUF models need the `gguf` feature; use --vocab for a vocabulary file".to_string())
}

/// Parsed `complete` arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteArgs {
    pub model: ModelArgs,
    pub prompt: String,
    pub config: GenerationConfig,
    pub stream: bool,
}

pub fn parse_complete_args(args: &[String]) -> Result<CompleteArgs, String> {
    let mut parsed = CompleteArgs::default();
    let mut stop = Vec::new();
    let mut i = 2;
    while i < args.len() {
        if let Some(used) = parsed.model.take(args, i)? {
            i += used;
            continue;
        }
        match args[i].as_str() {
            "--prompt" => parsed.prompt = flag_value(args, i)?.to_string(),
            "--max-tokens" => parsed.config.max_tokens = Some(parse_flag(args, i)?),
            "--temperature" => parsed.config.temperature = Some(parse_flag(args, i)?),
            "--top-k" => parsed.config.top_k = Some(parse_flag(args, i)?),
            "--top-p" => parsed.config.top_p = Some(parse_flag(args, i)?),
            "--repeat-penalty" => parsed.config.repetition_penalty = Some(parse_flag(args, i)?),
            "--repeat-last-n" => parsed.config.repeat_last_n = Some(parse_flag(args, i)?),
            "--seed" => parsed.config.seed = Some(parse_flag(args, i)?),
            "--stop" => stop.push(flag_value(args, i)?.to_string()),
            "--echo" => {
                parsed.config.echo = true;
                i += 1;
                continue;
            }
            "--stream" => {
                parsed.stream = true;
                i += 1;
                continue;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 2;
    }
    if parsed.prompt.is_empty() {
        return Err("Missing --prompt".to_string());
    }
    parsed.config.stop = stop;
    parsed.config.validate().map_err(|e| e.to_string())?;
    Ok(parsed)
}

/// Run `complete`: one JSON object, or one per fragment with `--stream`.
pub async fn run_complete(args: &[String]) -> u8 {
    let parsed = match parse_complete_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!(
                "Usage: ember-cli complete (--vocab FILE | --model FILE) --prompt TEXT \
                 [--max-tokens N] [--stop S]... [--stream]"
            );
            return EXIT_USAGE;
        }
    };
    let handle = match parsed
        .model
        .settings()
        .and_then(|settings| {
            let backend = parsed.model.load_backend(&settings)?;
            ModelHandle::new(backend, settings).map_err(|e| e.to_string())
        }) {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };

    let mut receiver = spawn_completion(handle, parsed.prompt, parsed.config, 16);
    if parsed.stream {
        while let Some(item) = receiver.next().await {
            match item.and_then(|fragment| to_json(&fragment)) {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return EXIT_FAILURE;
                }
            }
        }
        EXIT_OK
    } else {
        match receiver.collect().await.and_then(|result| to_json(&result)) {
            Ok(line) => {
                println!("{}", line);
                EXIT_OK
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                EXIT_FAILURE
            }
        }
    }
}

fn to_json(result: &CompletionResult) -> Result<String, CompletionError> {
    serde_json::to_string(result).map_err(|e| CompletionError::Backend(format!("serialize: {e}")))
}

/// Run `tokenize`: prints the token ids as a JSON array.
pub fn run_tokenize(args: &[String]) -> u8 {
    let mut model = ModelArgs::default();
    let mut text = None;
    let mut add_bos = true;
    let mut i = 2;
    while i < args.len() {
        match model.take(args, i) {
            Ok(Some(used)) => {
                i += used;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("{}", e);
                return EXIT_USAGE;
            }
        }
        match args[i].as_str() {
            "--text" => match flag_value(args, i) {
                Ok(v) => {
                    text = Some(v.to_string());
                    i += 2;
                }
                Err(e) => {
                    eprintln!("{}", e);
                    return EXIT_USAGE;
                }
            },
            "--no-bos" => {
                add_bos = false;
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                return EXIT_USAGE;
            }
        }
    }
    let Some(text) = text else {
        eprintln!("Usage: ember-cli tokenize (--vocab FILE | --model FILE) --text TEXT [--no-bos]");
        return EXIT_USAGE;
    };

    let tokens = model
        .settings()
        .and_then(|settings| model.load_backend(&settings))
        .and_then(|backend| {
            TokenizerAdapter::new(backend)
                .tokenize(text.as_bytes(), add_bos)
                .map_err(|e| e.to_string())
        });
    match tokens {
        Ok(tokens) => {
            println!("{}", serde_json::Value::from(tokens));
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Parse a comma-separated token list.
pub fn parse_token_list(raw: &str) -> Result<Vec<TokenId>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TokenId>().map_err(|_| format!("Invalid token id: {}", s)))
        .collect()
}

/// Run `detokenize`: prints the decoded text.
pub fn run_detokenize(args: &[String]) -> u8 {
    let mut model = ModelArgs::default();
    let mut tokens = None;
    let mut i = 2;
    while i < args.len() {
        match model.take(args, i) {
            Ok(Some(used)) => {
                i += used;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("{}", e);
                return EXIT_USAGE;
            }
        }
        if args[i] != "--tokens" {
            eprintln!("Unknown argument: {}", args[i]);
            return EXIT_USAGE;
        }
        match flag_value(args, i).and_then(parse_token_list) {
            Ok(list) => tokens = Some(list),
            Err(e) => {
                eprintln!("{}", e);
                return EXIT_USAGE;
            }
        }
        i += 2;
    }
    let Some(tokens) = tokens else {
        eprintln!("Usage: ember-cli detokenize (--vocab FILE | --model FILE) --tokens 1,2,3");
        return EXIT_USAGE;
    };

    let text = model
        .settings()
        .and_then(|settings| model.load_backend(&settings))
        .and_then(|backend| TokenizerAdapter::new(backend).detokenize(&tokens).map_err(|e| e.to_string()));
    match text {
        Ok(bytes) => {
            println!("{}", String::from_utf8_lossy(&bytes));
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_complete_args() {
        let parsed = parse_complete_args(&args(&[
            "ember-cli", "complete", "--vocab", "v.json", "--prompt", "The quick",
            "--max-tokens", "4", "--stop", "lazy", "--stop", ".", "--stream", "--seed", "9",
        ]))
        .unwrap();
        assert_eq!(parsed.model.vocab.as_deref(), Some("v.json"));
        assert_eq!(parsed.prompt, "The quick");
        assert_eq!(parsed.config.max_tokens, Some(4));
        assert_eq!(parsed.config.stop, vec!["lazy".to_string(), ".".to_string()]);
        assert_eq!(parsed.config.seed, Some(9));
        assert!(parsed.stream);
    }

    #[test]
    fn test_parse_complete_args_errors() {
        assert!(parse_complete_args(&args(&["ember-cli", "complete", "--vocab", "v"])).is_err());
        assert!(parse_complete_args(&args(&[
            "ember-cli", "complete", "--prompt", "x", "--top-p", "3"
        ]))
        .is_err());
        assert!(parse_complete_args(&args(&["ember-cli", "complete", "--bogus"])).is_err());
    }

    #[test]
    fn test_parse_token_list() {
        assert_eq!(parse_token_list("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_token_list("1,x").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(run_tokenize(&args(&["ember-cli", "tokenize", "--vocab", "v.json"])), EXIT_USAGE);
        assert_eq!(run_detokenize(&args(&["ember-cli", "detokenize", "--tokens", "1,x"])), EXIT_USAGE);
        assert_eq!(
            run_tokenize(&args(&[
                "ember-cli", "tokenize", "--vocab", "/nonexistent/vocab.json", "--text", "hi"
            ])),
            EXIT_FAILURE
        );
    }

    #[tokio::test]
    async fn test_complete_usage_error() {
        assert_eq!(run_complete(&args(&["ember-cli", "complete", "--stream"])).await, EXIT_USAGE);
    }
}
