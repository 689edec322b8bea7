//! LDraw Resolver CLI
//!
//! Resolve LDraw models against a parts library and inspect the result.

use clap::{Parser, Subcommand, ValueEnum};
use ldraw_resolver::{
    export_json, load_color_table, load_library, ColorCode, ColorScheme, ResolveOptions, Resolver, Severity,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ldraw-resolver")]
#[command(author, version, about = "Resolve LDraw models into instanced geometry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a model and print a summary
    Resolve {
        /// LDraw library (directory or ZIP)
        #[arg(short, long)]
        library: PathBuf,

        /// Model name inside the library, or a path to a model file
        model: String,

        /// Working colour of the root model
        #[arg(short, long, default_value = "16")]
        color: String,

        /// Colour scheme
        #[arg(long, value_enum, default_value = "ldraw")]
        scheme: SchemeArg,

        /// Resolve options as JSON
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the full JSON summary here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print how colour codes resolve
    Color {
        /// LDraw library (directory or ZIP)
        #[arg(short, long)]
        library: PathBuf,

        /// Colour codes, e.g. 4 or 0x2FF0000
        #[arg(required = true)]
        codes: Vec<String>,

        /// Colour scheme
        #[arg(long, value_enum, default_value = "ldraw")]
        scheme: SchemeArg,
    },

    /// Show information about a library
    Info {
        /// LDraw library (directory or ZIP)
        #[arg(short, long)]
        library: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum SchemeArg {
    Ldraw,
    Alt,
    Realistic,
}

impl From<SchemeArg> for ColorScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Ldraw => ColorScheme::Ldraw,
            SchemeArg::Alt => ColorScheme::Alternate,
            SchemeArg::Realistic => ColorScheme::Realistic,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve {
            library,
            model,
            color,
            scheme,
            config,
            output,
        } => {
            resolve_model(&library, &model, &color, scheme.into(), config.as_ref(), output.as_ref())?;
        }
        Commands::Color { library, codes, scheme } => {
            show_colors(&library, &codes, scheme.into())?;
        }
        Commands::Info { library } => {
            show_library_info(&library)?;
        }
    }

    Ok(())
}

fn resolve_model(
    library: &PathBuf,
    model: &str,
    color: &str,
    scheme: ColorScheme,
    config: Option<&PathBuf>,
    output: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let options: ResolveOptions = match config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ResolveOptions::default(),
    };

    println!("Loading library from {:?}...", library);
    let documents = Arc::new(load_library(library)?);
    let colors = Arc::new(load_color_table(&documents, scheme));
    println!("  {} colours", colors.len());

    // a model file outside the library is registered under its file name
    let root = match fs::read_to_string(model) {
        Ok(text) => {
            let name = PathBuf::from(model)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| model.to_string());
            documents.insert_text(&name, &text);
            name
        }
        Err(_) => model.to_string(),
    };

    let resolver = Resolver::new(documents, colors).with_options(options);
    let result = resolver.resolve(&root, ColorCode::new(color))?;

    println!("\nResolved {}:", result.root);
    println!("  Instances: {}", result.instances.len());
    println!("  Buckets: {}", result.geometry.len());
    println!("  Triangles: {}", result.triangle_count());
    println!("  Colours: {}", result.colors.len());
    println!("  Textures: {}", result.textures.len());
    println!("  Events: {}", result.events.len());
    let warnings = result
        .diagnostics
        .iter()
        .filter(|d| d.severity >= Severity::Warning)
        .count();
    println!("  Diagnostics: {} ({} warnings or worse)", result.diagnostics.len(), warnings);
    if result.cancelled {
        println!("  (cancelled)");
    }

    if let Some(path) = output {
        let json = export_json(&result)?;
        fs::write(path, json)?;
        println!("\nWrote summary to {:?}", path);
    }

    Ok(())
}

fn show_colors(library: &PathBuf, codes: &[String], scheme: ColorScheme) -> Result<(), Box<dyn std::error::Error>> {
    let documents = load_library(library)?;
    let colors = load_color_table(&documents, scheme);

    for code in codes {
        let def = colors.resolve(&ColorCode::new(code));
        println!(
            "{:>10}  {:<24} {} edge {} alpha {}{}",
            code,
            def.name.as_deref().unwrap_or("-"),
            def.hex(),
            ldraw_resolver::color::format_hex(colors.edge_rgb(&def)),
            def.alpha,
            if def.is_fallback { "  (unknown)" } else { "" }
        );
    }

    Ok(())
}

fn show_library_info(library: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading library from {:?}...", library);
    let source = ldraw_resolver::LibrarySource::open(library)?;
    let stats = source.stats();

    println!("\nLibrary Info:");
    println!("  Files: {}", stats.files);
    println!("  Parts: {}", stats.parts);
    println!("  Subparts: {}", stats.subparts);
    println!("  Primitives: {}", stats.primitives);
    println!("  Models: {}", stats.models);
    println!("  Textures: {}", stats.textures);
    println!("  Unofficial: {}", stats.unofficial);

    Ok(())
}
