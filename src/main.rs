//! Qianfan CLI - chat with Qianfan models from the terminal

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qianfan::{ChatCompletionBuilder, Config, QianfanClient};
use serde_json::Value;
use std::io::Write;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "qianfan")]
#[command(about = "Chat with Qianfan large language models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single chat completion
    Chat {
        /// User message
        prompt: String,

        /// Model to use (default: config chat.model)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        /// Extra body parameter as key=value; JSON values are parsed
        #[arg(short, long)]
        extra: Vec<String>,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Chat {
            prompt,
            model,
            system,
            temperature,
            stream,
            extra,
        } => {
            run_chat(prompt, model, system, temperature, stream, extra).await?;
        }
        Commands::Config(cmd) => {
            run_config_command(cmd)?;
        }
    }

    Ok(())
}

async fn run_chat(
    prompt: String,
    model: Option<String>,
    system: Option<String>,
    temperature: Option<f32>,
    stream: bool,
    extra: Vec<String>,
) -> Result<()> {
    let config = Config::load()?;
    config
        .validate()
        .context("no credentials configured, run `qianfan config init` or set QIANFAN_ACCESS_KEY/QIANFAN_SECRET_KEY")?;
    let client = QianfanClient::new(&config)?;

    let mut builder = ChatCompletionBuilder::new();
    if let Some(model) = model {
        builder = builder.model(model);
    }
    if let Some(system) = system {
        builder = builder.system(system);
    }
    builder = builder.add_user_message(prompt);
    if let Some(temperature) = temperature {
        builder = builder.temperature(temperature);
    }
    for pair in extra {
        let (key, value) = parse_extra(&pair)?;
        builder = builder.add_extra_parameter(key, value);
    }

    if stream {
        let mut chunks = builder.execute_stream(&client).await?;
        let mut stdout = std::io::stdout();
        while let Some(chunk) = chunks.next().await? {
            eprint!("{}", chunk.reasoning_content());
            print!("{}", chunk.content());
            stdout.flush()?;
        }
        println!();
        info!("Stream finished after {} chunks", chunks.chunks_emitted());
    } else {
        let response = builder.execute(&client).await?;
        println!("{}", response.content());
        if let Some(usage) = response.usage {
            info!(
                "Tokens: prompt {}, completion {}, total {}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
    }

    Ok(())
}

/// `key=value`, the value parsed as JSON when it is valid JSON
fn parse_extra(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        bail!("extra parameter must be key=value: {}", pair);
    };
    if key.is_empty() {
        bail!("extra parameter has an empty key: {}", pair);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn run_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => config_init(force)?,
        ConfigCommands::Show => config_show()?,
        ConfigCommands::Path => config_path(),
    }
    Ok(())
}

fn config_init(force: bool) -> Result<()> {
    let path = Config::default_path();

    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    std::fs::create_dir_all(path.parent().unwrap_or(std::path::Path::new(".")))?;
    std::fs::write(&path, Config::example())?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file to add your access key pair, or");
    println!("  2. Set environment variables:");
    println!("     export QIANFAN_ACCESS_KEY=your_access_key");
    println!("     export QIANFAN_SECRET_KEY=your_secret_key");

    Ok(())
}

fn config_show() -> Result<()> {
    let mut config = Config::load()?;

    // Mask secrets in display
    let creds = &mut config.credentials;
    for secret in [
        &mut creds.api_key,
        &mut creds.secret_key,
        &mut creds.access_key,
        &mut creds.access_secret_key,
    ] {
        if secret.is_some() {
            *secret = Some("***".to_string());
        }
    }
    println!("{}", toml::to_string_pretty(&config)?);

    println!("\n--- Environment Variables ---");
    for name in [
        "QIANFAN_ACCESS_KEY",
        "QIANFAN_SECRET_KEY",
        "QIANFAN_AK",
        "QIANFAN_SK",
        "QIANFAN_BASE_URL",
        "QIANFAN_MODEL",
    ] {
        let status = if std::env::var(name).is_ok() { "set" } else { "not set" };
        println!("{}: {}", name, status);
    }

    Ok(())
}

fn config_path() {
    let path = Config::default_path();
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extra() {
        assert_eq!(parse_extra("top_k=5").unwrap(), ("top_k".to_string(), json!(5)));
        assert_eq!(
            parse_extra("search={\"enable\":true}").unwrap().1,
            json!({"enable": true})
        );
        assert_eq!(parse_extra("name=ernie").unwrap().1, json!("ernie"));
        assert!(parse_extra("novalue").is_err());
        assert!(parse_extra("=1").is_err());
    }
}
