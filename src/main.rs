pub mod aggregate;
pub mod config;
pub mod data;
pub mod geometry;
pub mod points;
pub mod server;
pub mod types;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use geojson::GeoJson;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the facilities API and dashboard assets
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run one aggregation pass and emit the annotated district GeoJSON
    Annotate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let facilities = data::load_facilities(&app_config)?;
            let districts = data::load_districts(&app_config)?;
            server::start_server(app_config, facilities, districts).await?;
        }
        Commands::Annotate { config, output } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let facilities = data::load_facilities(&app_config)?;
            let districts = data::load_districts(&app_config)?;

            let coords = points::build(&facilities);
            info!("Counting {} facilities across {} districts", coords.len(), districts.features.len());
            let annotated = aggregate::annotate(&districts, &coords);

            for error in &annotated.errors {
                warn!("Skipping facility count for {}", error);
            }
            let total = annotated.collection.features.len();
            if total > 0 && annotated.errors.len() == total {
                return Err(anyhow!("No district geometry could be annotated"));
            }

            let geojson = GeoJson::FeatureCollection(annotated.collection);
            match output {
                Some(path) => {
                    fs::write(path, geojson.to_string())?;
                    info!("Wrote annotated districts to {:?}", path);
                }
                None => println!("{}", geojson),
            }
        }
    }

    Ok(())
}
