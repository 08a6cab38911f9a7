pub mod types;
pub mod config;
pub mod data;
pub mod engine;
pub mod filter;
pub mod heatmap;
pub mod canvas;
pub mod overlay;
pub mod panel;
pub mod page;
pub mod render;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::filter::FilterAction;
use crate::page::{MapPage, PageVariant};
use crate::panel::FilterControls;
use crate::render::RasterEngine;
use crate::types::{CategoryFilter, TimeOfDay};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Map access token; an empty value renders without basemap tiles
    #[arg(long, env = "MAPBOX_ACCESS_TOKEN", default_value = "", hide_env_values = true, global = true)]
    access_token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the deal API and static map page
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render a snapshot of the deal map to PNG
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Category chip, or "All"
        #[arg(long, default_value = "All")]
        category: CategoryFilter,
        #[arg(long, default_value = "Afternoon")]
        time: TimeOfDay,
        #[arg(long)]
        no_heatmap: bool,
        #[arg(long)]
        no_discounts: bool,
        /// Deal id to open the detail card for
        #[arg(long)]
        select: Option<u32>,
        /// Render the non-interactive preview variant
        #[arg(long)]
        preview: bool,
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_or_default(&config)?;
            server::start_server(app_config, cli.access_token).await?;
        }
        Commands::Render { config, category, time, no_heatmap, no_discounts, select, preview, out } => {
            let app_config = config::AppConfig::load_or_default(&config)?;
            let variant = if preview { PageVariant::Preview } else { PageVariant::Full };
            let options = app_config.engine_options(variant.zoom(&app_config.map), &cli.access_token);

            let mut page: MapPage<RasterEngine> = MapPage::new(variant, options);
            page.mount(RasterEngine::new);

            // Filters may land before the style does; the canvas replays them once ready.
            page.apply(FilterAction::SetCategory(category));
            page.apply(FilterAction::SetTime(time));
            page.apply(FilterAction::SetHeatmap(!no_heatmap));
            page.apply(FilterAction::SetDiscounts(!no_discounts));

            if let Some(engine) = page.canvas_mut().engine_mut() {
                engine.finish_style_load();
            }
            page.pump();

            if let Some(id) = select {
                page.apply(FilterAction::Select(id));
            }
            if let Some(card) = page.overlay_card() {
                tracing::info!(
                    deal = card.deal.name,
                    x = card.position.x,
                    y = card.position.y,
                    "detail card position"
                );
            }

            let out = out.unwrap_or_else(|| app_config.output.snapshot.clone());
            if let Some(engine) = page.canvas().engine() {
                engine.save_png(&out)?;
            }
            println!("Rendered {:?} map with {} deals to {:?}", page.variant(), page.canvas().marker_count(), out);
            page.unmount();
        }
    }

    Ok(())
}
