// tacmap - Tactical map tools
// Consolidated entrypoint for:
// - build:  scene JSON -> .tmap
// - stitch: several .tmap parcels -> one .tmap
// - info:   grid and level statistics
// - query:  level lookup at a world position
// - damage: apply a damage box and write the result

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glam::Vec3;
use tacmap_shared::config::Config;
use tacmap_shared::log::{initialize_logging, map_log_level};
use tacmap_shared::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
use tactical_map::map::ALL_LAYERS;
use tactical_map::{Aabb, BuilderConfig, Executor, Rotation, Stitcher, TacticalMap, TacticalMapBuilder, format};

mod scene;

use scene::Scene;

#[derive(Parser, Debug)]
#[command(name = "tacmap")]
#[command(about = "Tactical map builder and tools")]
#[command(version)]
struct Cli {
    /// Console log level override (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    /// INI configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a tactical map from a JSON scene
    Build(BuildArgs),
    /// Combine built maps into one
    Stitch(StitchArgs),
    /// Print map statistics
    Info(InfoArgs),
    /// Look up the level at a world position
    Query(QueryArgs),
    /// Apply a damage box to a map
    Damage(DamageArgs),
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Scene description (JSON)
    scene: PathBuf,

    /// Output map file
    #[arg(short = 'o', long = "output", default_value = "out.tmap")]
    output: PathBuf,

    /// JSON builder configuration (overrides the INI settings)
    #[arg(long = "builder-config")]
    builder_config: Option<PathBuf>,

    /// Tile size in world units
    #[arg(long = "tile-size")]
    tile_size: Option<f32>,

    /// Height the sampling rays start from
    #[arg(long = "min-ray-height", allow_negative_numbers = true)]
    min_ray_height: Option<f32>,

    /// Steepest surface (degrees) still counted as floor or ceiling
    #[arg(long = "max-floor-inclination")]
    max_floor_inclination: Option<f32>,

    /// Opaque payload bytes per level
    #[arg(long = "metadata-size")]
    metadata_size: Option<u32>,

    /// Number of threads to use
    #[arg(long = "threads")]
    threads: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
struct ParcelPlacement {
    path: PathBuf,
    position: Vec3,
    rotation: Rotation,
    parcel_id: u32,
}

fn parse_f32(value: Option<&str>, what: &str) -> Result<f32, String> {
    value
        .ok_or_else(|| format!("Missing {}", what))?
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("Invalid {}", what))
}

fn parse_point(input: &str) -> Result<Vec3, String> {
    let mut parts = input.split(',');
    let x = parse_f32(parts.next(), "X")?;
    let y = parse_f32(parts.next(), "Y")?;
    let z = parse_f32(parts.next(), "Z")?;
    if parts.next().is_some() {
        return Err("Expected X,Y,Z".to_string());
    }
    Ok(Vec3::new(x, y, z))
}

/// `file.tmap@x,y,z,rotation,parcel`
fn parse_placement(input: &str) -> Result<ParcelPlacement, String> {
    let (path, placement) = input
        .rsplit_once('@')
        .ok_or_else(|| "Expected FILE@X,Y,Z,ROTATION,PARCEL".to_string())?;
    let mut parts = placement.split(',');
    let x = parse_f32(parts.next(), "X")?;
    let y = parse_f32(parts.next(), "Y")?;
    let z = parse_f32(parts.next(), "Z")?;
    let degrees = parts
        .next()
        .ok_or_else(|| "Missing rotation".to_string())?
        .trim()
        .parse::<i32>()
        .map_err(|_| "Invalid rotation".to_string())?;
    let rotation =
        Rotation::from_degrees(degrees).ok_or_else(|| format!("Rotation {} is not a multiple of 90", degrees))?;
    let parcel_id = parts
        .next()
        .ok_or_else(|| "Missing parcel id".to_string())?
        .trim()
        .parse::<u32>()
        .map_err(|_| "Invalid parcel id".to_string())?;
    Ok(ParcelPlacement {
        path: PathBuf::from(path),
        position: Vec3::new(x, y, z),
        rotation,
        parcel_id,
    })
}

#[derive(Args, Debug)]
struct StitchArgs {
    /// Output map file
    #[arg(short = 'o', long = "output", default_value = "stitched.tmap")]
    output: PathBuf,

    /// Parcel placement (format: FILE@X,Y,Z,ROTATION,PARCEL), repeatable
    #[arg(long = "parcel", value_parser = parse_placement, required = true, allow_hyphen_values = true)]
    parcels: Vec<ParcelPlacement>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Map file
    map: PathBuf,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Map file
    map: PathBuf,

    /// World position (format: X,Y,Z)
    #[arg(value_parser = parse_point, allow_hyphen_values = true)]
    point: Vec3,

    /// Vertical search range around the point
    #[arg(long = "range", default_value_t = 1.0)]
    range: f32,

    /// Layer mask (one bit per layer)
    #[arg(long = "mask", default_value_t = ALL_LAYERS)]
    mask: u32,
}

#[derive(Args, Debug)]
struct DamageArgs {
    /// Map file
    map: PathBuf,

    /// Damage box minimum corner (format: X,Y,Z)
    #[arg(long = "min", value_parser = parse_point, allow_hyphen_values = true)]
    min: Vec3,

    /// Damage box maximum corner (format: X,Y,Z)
    #[arg(long = "max", value_parser = parse_point, allow_hyphen_values = true)]
    max: Vec3,

    /// Where to write the damaged map (default: overwrite the input)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

/// INI settings with `Tacmap_` environment overrides; a missing file only
/// leaves the environment.
fn load_config(path: &str) -> (Config, bool) {
    let mut config = Config::with_env_prefix(ENV_PREFIX);
    let loaded = config.set_source(path, ENV_PREFIX);
    (config, loaded)
}

fn init_logging(config: &Config, log_level: Option<i32>) {
    let console_level = map_log_level(log_level.unwrap_or_else(|| config.get_int_default("LogLevel", 2)));
    let logs_dir = config.get_string_default("LogsDir", "");
    initialize_logging((!logs_dir.is_empty()).then_some(logs_dir.as_str()), console_level);
}

fn resolve_threads(config: &Config, threads: Option<usize>) -> usize {
    threads
        .or_else(|| usize::try_from(config.get_int_default("Threads", 0)).ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
}

/// Defaults, then the INI file, then an optional JSON file, then flags.
fn builder_config(config: &Config, args: &BuildArgs) -> anyhow::Result<BuilderConfig> {
    let defaults = BuilderConfig::default();
    let mut builder_config = BuilderConfig {
        tile_size: config.get_float_default("TileSize", defaults.tile_size),
        min_ray_height: config.get_float_default("MinRayHeight", defaults.min_ray_height),
        max_floor_inclination_deg: config.get_float_default("MaxFloorInclination", defaults.max_floor_inclination_deg),
        metadata_size: u32::try_from(config.get_int_default("MetadataSize", 0)).unwrap_or(0),
        bounds: None,
    };

    if let Some(path) = &args.builder_config {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        builder_config = serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;
    }

    if let Some(tile_size) = args.tile_size {
        builder_config.tile_size = tile_size;
    }
    if let Some(height) = args.min_ray_height {
        builder_config.min_ray_height = height;
    }
    if let Some(degrees) = args.max_floor_inclination {
        builder_config.max_floor_inclination_deg = degrees;
    }
    if let Some(size) = args.metadata_size {
        builder_config.metadata_size = size;
    }
    Ok(builder_config)
}

fn load_map(path: &Path) -> anyhow::Result<TacticalMap> {
    format::load_from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn save_map(map: &TacticalMap, path: &Path) -> anyhow::Result<()> {
    format::save_to_file(map, path).with_context(|| format!("writing {}", path.display()))
}

fn run_build(config: &Config, args: BuildArgs) -> anyhow::Result<()> {
    let threads = resolve_threads(config, args.threads);
    let builder_config = builder_config(config, &args)?;
    tracing::info!(
        "Build: scene='{}' output='{}' threads={} config={:?}",
        args.scene.display(),
        args.output.display(),
        threads,
        builder_config
    );

    let scene = Scene::load(&args.scene)?;
    let mut builder = TacticalMapBuilder::new(builder_config);
    scene.populate(&mut builder)?;

    let map = builder.build(&Executor::new(threads))?;
    save_map(&map, &args.output)
}

fn run_stitch(args: StitchArgs) -> anyhow::Result<()> {
    let maps = args
        .parcels
        .iter()
        .map(|parcel| load_map(&parcel.path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut stitcher = Stitcher::new();
    for (parcel, map) in args.parcels.iter().zip(&maps) {
        stitcher.add_instance(map, parcel.position, parcel.rotation, parcel.parcel_id);
    }
    let map = stitcher.build()?;
    save_map(&map, &args.output)
}

fn run_info(args: InfoArgs) -> anyhow::Result<()> {
    let map = load_map(&args.map)?;
    let grid = map.grid();
    let stats = map.stats();
    println!("grid:          {}x{} tiles of {}", grid.width, grid.height, grid.tile_size);
    println!("origin:        {:?}", grid.origin);
    println!("heights:       {} .. {}", grid.min_height, grid.max_height);
    println!("metadata size: {}", map.metadata_size());
    println!("tiles:         {} ({} occupied)", stats.tiles, stats.occupied_tiles);
    println!("levels:        {} (max {} per tile)", stats.levels, stats.max_levels_per_tile);
    println!("destructible:  {}", stats.destructible_levels);
    println!("structural:    {}", stats.structural_levels);
    println!("destroyed:     {}", stats.destroyed_levels);
    Ok(())
}

fn run_query(args: QueryArgs) -> anyhow::Result<()> {
    let map = load_map(&args.map)?;
    match map.lookup_at_world(args.point, args.range, args.mask) {
        Some(hit) => {
            let header = map
                .level_header(hit.level_index)
                .map(|data| data.header)
                .unwrap_or_default();
            println!(
                "tile {},{} level {} floor {:.3}{} instance {} type {:?} integrity {}",
                hit.tile_x,
                hit.tile_z,
                hit.level,
                hit.floor_height,
                if hit.matched { "" } else { " (fallback)" },
                header.instance_id,
                header.structural_type,
                header.structural_integrity
            );
        }
        None => println!("no level at {:?}", args.point),
    }
    Ok(())
}

fn run_damage(args: DamageArgs) -> anyhow::Result<()> {
    let mut map = load_map(&args.map)?;
    let damage = Aabb::new(args.min.min(args.max), args.min.max(args.max));
    let report = map.damage_structure(&damage);
    for level in &report.levels {
        println!(
            "tile {},{} level {} integrity {}{}",
            level.tile_x,
            level.tile_z,
            level.level,
            level.integrity,
            if level.destroyed { " destroyed" } else { "" }
        );
    }
    println!(
        "{} tiles visited, {} levels damaged, {} destroyed",
        report.tiles_visited,
        report.levels.len(),
        report.destroyed_count()
    );
    save_map(&map, args.output.as_deref().unwrap_or(args.map.as_path()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, loaded) = load_config(&cli.config);

    init_logging(&config, cli.log_level);
    if !loaded {
        tracing::debug!("No configuration file at {}, using defaults", cli.config);
    }

    match cli.command {
        Command::Build(args) => run_build(&config, args),
        Command::Stitch(args) => run_stitch(args),
        Command::Info(args) => run_info(args),
        Command::Query(args) => run_query(args),
        Command::Damage(args) => run_damage(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1,-2.5, 3").unwrap(), Vec3::new(1.0, -2.5, 3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,2,3,4").is_err());
        assert!(parse_point("a,2,3").is_err());
    }

    #[test]
    fn test_parse_placement() {
        let placement = parse_placement("maps/house.tmap@10,0,-4,270,9").unwrap();
        assert_eq!(placement.path, PathBuf::from("maps/house.tmap"));
        assert_eq!(placement.position, Vec3::new(10.0, 0.0, -4.0));
        assert_eq!(placement.rotation, Rotation::R270);
        assert_eq!(placement.parcel_id, 9);

        assert!(parse_placement("house.tmap").is_err());
        assert!(parse_placement("house.tmap@0,0,0,45,1").is_err());
        assert!(parse_placement("house.tmap@0,0,0,90").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "tacmap",
            "-l",
            "3",
            "stitch",
            "-o",
            "out.tmap",
            "--parcel",
            "a.tmap@0,0,0,0,1",
            "--parcel",
            "b.tmap@8,0,0,180,2",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(3));
        let Command::Stitch(args) = cli.command else {
            panic!("expected stitch");
        };
        assert_eq!(args.parcels.len(), 2);
        assert_eq!(args.parcels[1].rotation, Rotation::R180);

        let cli = Cli::try_parse_from(["tacmap", "query", "m.tmap", "-1,2,3", "--range", "0.5"]).unwrap();
        let Command::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.point, Vec3::new(-1.0, 2.0, 3.0));
        assert_eq!(args.mask, ALL_LAYERS);
    }

    #[test]
    fn test_builder_config_layering() {
        let mut config = Config::new();
        assert!(config.read_str("[tacmap]\nTileSize = 2.0\nMetadataSize = 8\n"));
        let args = BuildArgs {
            scene: PathBuf::from("scene.json"),
            output: PathBuf::from("out.tmap"),
            builder_config: None,
            tile_size: None,
            min_ray_height: Some(-50.0),
            max_floor_inclination: None,
            metadata_size: None,
            threads: None,
        };
        let built = builder_config(&config, &args).unwrap();
        assert_eq!(built.tile_size, 2.0);
        assert_eq!(built.metadata_size, 8);
        assert_eq!(built.min_ray_height, -50.0);
        assert_eq!(built.max_floor_inclination_deg, 60.0);
    }
}
