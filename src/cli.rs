use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::certificate::{CertificateClient, VerifyOutcome};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::inference::InferenceAdapter;
use crate::policy::DecisionPolicy;
use crate::server;

#[derive(Parser)]
#[command(name = "authcheck")]
#[command(about = "Image authenticity checker with certificate minting and verification")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "AUTHCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by AUTHCHECK_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve,
    /// Classify a single image and print its confidence
    Classify {
        /// Image to classify
        image: PathBuf,
    },
    /// Classify an image and mint a certificate when it qualifies
    Mint {
        /// Image to classify
        image: PathBuf,
        /// Directory the certificate PDF is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Verify a certificate identifier
    Verify {
        /// Certificate identifier, e.g. OF-ABCDE1234
        id: String,
        /// Save the certificate's QR code to this file
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve => server::run(&config).await?,
        Commands::Classify { image } => {
            classify(&config, &image)?;
        }
        Commands::Mint { image, out } => mint(&config, &image, &out).await?,
        Commands::Verify { id, qr_out } => verify(&config, &id, qr_out.as_deref()).await?,
    }
    Ok(())
}

fn classify(config: &AppConfig, image: &Path) -> Result<f32> {
    let adapter = InferenceAdapter::load(&config.model)?;
    let bytes =
        std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let prediction = adapter.predict_bytes(&bytes)?;

    let policy = DecisionPolicy::from(&config.policy);
    let confidence = prediction.confidence();
    let band = policy.classify(confidence);

    println!("confidence: {confidence:.1}%");
    println!("complement: {:.1}%", prediction.complement());
    println!("band:       {}", band.describe());
    println!(
        "minting:    {}",
        if band.mint_enabled() { "enabled" } else { "disabled" }
    );
    Ok(confidence)
}

async fn mint(config: &AppConfig, image: &Path, out: &Path) -> Result<()> {
    let confidence = classify(config, image)?;
    let policy = DecisionPolicy::from(&config.policy);
    let client = CertificateClient::from_config(&config.certificate, policy.mint_threshold())?;

    let minted = client.mint(confidence).await?;
    let target = out.join(format!("certificate-{}.pdf", minted.id));
    write_atomically(out, &target, &minted.pdf)?;

    println!("certificate: {}", minted.id);
    println!("confidence:  {:.1}%", minted.confidence);
    println!("issued at:   {}", minted.issued_at.to_rfc3339());
    println!("verify at:   {}", minted.qr_payload);
    println!("saved to:    {}", target.display());
    Ok(())
}

async fn verify(config: &AppConfig, id: &str, qr_out: Option<&Path>) -> Result<()> {
    let policy = DecisionPolicy::from(&config.policy);
    let client = CertificateClient::from_config(&config.certificate, policy.mint_threshold())?;

    match client.verify(id).await? {
        VerifyOutcome::Verified { id, metadata, qr } => {
            println!("certificate {id} verified");
            if let Some(confidence) = metadata.confidence {
                println!("confidence: {confidence:.1}%");
            }
            if let Some(timestamp) = &metadata.timestamp {
                println!("issued at:  {timestamp}");
            }
            for (key, value) in &metadata.extra {
                println!("{key}: {value}");
            }
            if let Some(path) = qr_out {
                let qr = match qr {
                    Some(qr) => qr,
                    None => client.fetch_qr_image(&id).await?,
                };
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
                write_atomically(dir.unwrap_or(Path::new(".")), path, &qr.bytes)?;
                println!("QR code saved to {}", path.display());
            }
            Ok(())
        }
        VerifyOutcome::NotFound { id } => Err(AppError::NotFound(id.to_string()).into()),
    }
}

/// Stage into a temporary file in `dir`, then rename over `target`, so a
/// failed download never leaves a truncated file behind.
fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".authcheck-download")
        .tempfile_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.persist(target)
        .with_context(|| format!("saving {}", target.display()))?;
    Ok(())
}
