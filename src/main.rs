use anyhow::Result;
use clap::Parser;
use jimeng_client::jimeng::{JimengClient, SessionCredential};
use jimeng_client::models::{Config, GenerationParams};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jimeng-client")]
#[command(about = "Generate images with Jimeng, optionally from a reference image")]
struct CliArgs {
    /// Prompt describing the image to generate.
    #[arg(short, long)]
    prompt: String,

    /// Reference image to upload; switches the job to blend mode.
    #[arg(short, long, value_name = "PATH")]
    image: Option<PathBuf>,

    #[arg(long, default_value = "")]
    negative_prompt: String,

    #[arg(long, default_value_t = 1024)]
    width: u32,

    #[arg(long, default_value_t = 1024)]
    height: u32,

    #[arg(long, default_value_t = 0.5, value_parser = parse_strength)]
    sample_strength: f64,

    /// Model name (defaults to JIMENG_MODEL).
    #[arg(short, long)]
    model: Option<String>,
}

fn parse_strength(input: &str) -> std::result::Result<f64, String> {
    let value: f64 = input
        .parse()
        .map_err(|_| format!("Invalid strength '{}'. Expected a number", input))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("Strength {} out of range 0.0..=1.0", value))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jimeng_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let token = config
        .session_tokens
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default();
    let credential = SessionCredential::new(token);

    let params = GenerationParams {
        model: args.model.unwrap_or_else(|| config.model.clone()),
        prompt: args.prompt,
        negative_prompt: args.negative_prompt,
        width: args.width,
        height: args.height,
        sample_strength: args.sample_strength,
    };

    let client = JimengClient::from_config(&config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling generation");
                cancel.cancel();
            }
        }
    });

    info!(model = %params.model, "Starting generation");
    let outcome = match &args.image {
        Some(path) => {
            client
                .image_to_images(&credential, path, &params, &cancel)
                .await
        }
        None => {
            client
                .generate_images(&credential, &params, None, &cancel)
                .await
        }
    };

    match outcome {
        Ok(urls) => {
            info!("Generated {} image(s)", urls.len());
            for url in urls {
                println!("{}", url);
            }
            Ok(())
        }
        Err(e) => {
            match e.api_kind() {
                Some(kind) => error!(code = kind.code(), "Generation failed: {}", e),
                None => error!("Generation failed: {}", e),
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_strength;

    #[test]
    fn test_parse_strength_valid() {
        assert_eq!(parse_strength("0.7").unwrap(), 0.7);
    }

    #[test]
    fn test_parse_strength_out_of_range() {
        let err = parse_strength("1.5").unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_parse_strength_not_a_number() {
        assert!(parse_strength("high").is_err());
    }
}
