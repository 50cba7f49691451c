use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use retrocss_lib::retro_generate::retro_css;
use retrocss_lib::{EngineVersion, HttpFetcher, RetrocssConfig, StaticFetcher, Transform};
use std::fs;
use std::path::Path;
use url::Url;

const RETROCSS_INTRO: &str = r#"
        ____       __             ____________
       / __ \___  / /__________  / ____/ ___/ ___/
      / /_/ / _ \/ __/ ___/ __ \/ /    \__ \\__ \
     / _, _/  __/ /_/ /  / /_/ / /___ ___/ /__/ /
    /_/ |_|\___/\__/_/   \____/\____//____/____/

    RetroCSS - modern CSS for older browser engines
"#;

#[derive(Parser)]
#[command(name = "retrocss")]
#[command(about = "Rewrite an HTML page's CSS for an older browser engine")]
struct Args {
    /// Input HTML file.
    input: String,

    /// Output HTML file.
    output: String,

    /// Engine version to target, e.g. 15.0 or 16.
    #[arg(long, default_value = "15.0")]
    target: EngineVersion,

    /// Document URL used to resolve stylesheet links. Defaults to the
    /// input file's location.
    #[arg(long)]
    base_url: Option<Url>,

    /// Run a transform even when the target supports the feature.
    #[arg(long = "force", value_name = "TRANSFORM")]
    force: Vec<Transform>,

    /// Never run a transform.
    #[arg(long = "skip", value_name = "TRANSFORM")]
    skip: Vec<Transform>,

    /// Do not load linked stylesheets.
    #[arg(long)]
    offline: bool,
}

fn file_url(path: &str) -> Result<Url> {
    let absolute = fs::canonicalize(Path::new(path))
        .with_context(|| format!("cannot resolve path {}", path))?;
    match Url::from_file_path(&absolute) {
        Ok(url) => Ok(url),
        Err(()) => bail!("cannot express {} as a file URL", absolute.display()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    println!("{}", RETROCSS_INTRO);

    // parse the args given in terminal
    let args: Args = Args::parse();

    let html_content = fs::read_to_string(&args.input)
        .with_context(|| format!("error reading HTML file {}", args.input))?;

    let base_url = match args.base_url {
        Some(url) => url,
        None => file_url(&args.input)?,
    };
    let config = RetrocssConfig {
        target: args.target,
        force_transforms: args.force,
        skip_transforms: args.skip,
        base_url: Some(base_url),
        ..RetrocssConfig::default()
    };

    let output = if args.offline {
        retro_css::retrofit(&html_content, config, StaticFetcher::new()).await
    } else {
        retro_css::retrofit(&html_content, config, HttpFetcher::new()).await
    }
    .context("retrofit failed")?;

    fs::write(&args.output, &output.html)
        .with_context(|| format!("error writing {}", args.output))?;
    info!("{} passes: {}", output.passes.len(), output.totals());
    println!("Wrote {}", args.output);
    Ok(())
}
