//! Inspect, stack and reproject sky map FITS files

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use skymap::{CoordSystem, MapDefinition, SkyMap, WcsGeometry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sky map inspection and conversion")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the geometry and per-layer flux of a map
    Info {
        /// Input FITS file
        input: PathBuf,
    },

    /// Sum all layers of a map into one
    Stack {
        /// Input FITS file
        input: PathBuf,

        /// Output FITS file
        output: PathBuf,

        /// Overwrite the output file if it exists
        #[arg(long, default_value_t = false)]
        clobber: bool,
    },

    /// Resample a map onto the geometry described by a JSON definition
    Reproject {
        /// Input FITS file
        input: PathBuf,

        /// JSON map definition of the target geometry
        geometry: PathBuf,

        /// Output FITS file
        output: PathBuf,

        /// Overwrite the output file if it exists
        #[arg(long, default_value_t = false)]
        clobber: bool,
    },

    /// Write a planar geometry definition to JSON
    Geometry {
        /// Output JSON file
        output: PathBuf,

        /// Projection code
        #[arg(long, default_value = "CAR")]
        projection: String,

        /// Coordinate system (CEL or GAL)
        #[arg(long, default_value = "CEL")]
        coords: String,

        /// Centre longitude in degrees
        #[arg(long, default_value_t = 0.0)]
        lon: f64,

        /// Centre latitude in degrees
        #[arg(long, default_value_t = 0.0)]
        lat: f64,

        /// Pixel size in degrees
        #[arg(long, default_value_t = 0.1)]
        binsize: f64,

        /// Number of pixels along x
        #[arg(long, default_value_t = 100)]
        nx: usize,

        /// Number of pixels along y
        #[arg(long, default_value_t = 100)]
        ny: usize,
    },
}

fn print_info(input: &PathBuf) -> Result<()> {
    let map = SkyMap::load(input).with_context(|| format!("reading {}", input.display()))?;
    println!("{map}");
    for layer in 0..map.nlayers() {
        println!(" Flux of layer {layer:<3} ........: {:.6e}", map.flux(layer)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Info { input } => print_info(&input)?,
        Command::Stack {
            input,
            output,
            clobber,
        } => {
            let mut map = SkyMap::load(&input)?;
            let layers = map.nlayers();
            map.stack_layers();
            map.save(&output, clobber)?;
            info!("Stacked {layers} layers into {}", output.display());
        }
        Command::Reproject {
            input,
            geometry,
            output,
            clobber,
        } => {
            let source = SkyMap::load(&input)?;
            let definition = MapDefinition::load_from_file(&geometry)?;
            let mut target = definition.build(source.nlayers())?;
            target.add_map(&source)?;
            target.save(&output, clobber)?;
            info!(
                "Reprojected {} pixels onto {} pixels in {}",
                source.npix(),
                target.npix(),
                output.display()
            );
        }
        Command::Geometry {
            output,
            projection,
            coords,
            lon,
            lat,
            binsize,
            nx,
            ny,
        } => {
            if binsize <= 0.0 {
                bail!("Pixel size must be positive, got {binsize}");
            }
            let coords: CoordSystem = coords.parse()?;
            let definition = MapDefinition::Wcs(WcsGeometry::new(
                &projection,
                coords,
                [lon, lat],
                [-binsize, binsize],
                nx,
                ny,
            ));
            // Fail early on unknown codes or sizes
            definition.build(1)?;
            definition.save_to_file(&output)?;
            info!("Wrote geometry definition to {}", output.display());
        }
    }
    Ok(())
}
