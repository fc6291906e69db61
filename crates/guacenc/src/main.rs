//! guacenc entrypoint: encode session recordings to video files.

use anyhow::Result;
use clap::Parser;
use guacenc::encode::{encode, EncodeOptions};
use guacenc::video::{VIDEO_DEFAULT_BITRATE, VIDEO_DEFAULT_HEIGHT, VIDEO_DEFAULT_WIDTH};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "guacenc",
    version,
    about = "Encode Guacamole session recordings to video"
)]
struct Args {
    /// Output resolution as WIDTHxHEIGHT.
    #[arg(short = 's', long = "size", value_parser = parse_dimensions)]
    size: Option<(i32, i32)>,

    /// Output bitrate, in bits per second.
    #[arg(short = 'r', long = "bitrate", default_value_t = VIDEO_DEFAULT_BITRATE)]
    bitrate: i32,

    /// Encode recordings that appear to still be in progress.
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Recording files to encode; each FILE produces FILE.ivf.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_dimensions(value: &str) -> Result<(i32, i32), String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("\"{value}\" is not of the form WIDTHxHEIGHT"))?;
    let width: i32 = width
        .parse()
        .map_err(|_| format!("invalid width \"{width}\""))?;
    let height: i32 = height
        .parse()
        .map_err(|_| format!("invalid height \"{height}\""))?;
    if width <= 0 || height <= 0 {
        return Err("dimensions must be positive".to_owned());
    }
    Ok((width, height))
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (width, height) = args
        .size
        .unwrap_or((VIDEO_DEFAULT_WIDTH, VIDEO_DEFAULT_HEIGHT));
    let options = EncodeOptions {
        width,
        height,
        bitrate: args.bitrate,
        force: args.force,
    };

    let mut failures = 0;
    for input in &args.files {
        let output = PathBuf::from(format!("{}.ivf", input.display()));
        if let Err(e) = encode(input, &output, &options) {
            error!(target: "enc", input = %input.display(), error = %e, "encoding failed");
            failures += 1;
        }
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
