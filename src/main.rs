//! Vista - a glTF/GLB scene viewer front-end
//!
//! Loads a scene from a local file, a directory of files, a URL (plain,
//! pre-signed or a ZIP bundle) or a viewer page location, and prints the
//! resulting scene graph.

mod location;
mod settings;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;
use vista_assets::{AssetMap, SceneDocument, SceneNode};
use vista_loader::{LoadOutcome, LoadRequest, SceneSink, ViewerClient};

use settings::ViewerSettings;

#[derive(Parser, Debug)]
#[command(name = "vista", version, about = "Load and inspect glTF/GLB scenes")]
struct Args {
    /// Scene file, directory of scene files, or URL to load
    input: Option<String>,

    /// Viewer page URL carrying the model as `/-<encoded>` or `?file=`
    #[arg(long, conflicts_with = "input")]
    location: Option<String>,

    /// Prefix applied to references when resolving against a file set
    #[arg(long)]
    root: Option<String>,

    /// Log level (overrides settings; `RUST_LOG` overrides both)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the scene summary as JSON
    #[arg(long)]
    json: bool,

    /// Write the effective settings to the config directory and exit
    #[arg(long)]
    save_settings: bool,
}

/// Logs every delivered scene graph.
struct LoggingSink;

impl SceneSink for LoggingSink {
    fn set_content(&self, scene: Arc<SceneDocument>) {
        info!(
            "Scene '{}': {} nodes, {} meshes, {} textures",
            scene.name.as_deref().unwrap_or(&scene.source),
            scene.node_count(),
            scene.meshes.len(),
            scene.textures.len()
        );
        for root in &scene.roots {
            log_node(root, 1);
        }
    }
}

fn log_node(node: &SceneNode, depth: usize) {
    info!("{}{} ({:?})", "  ".repeat(depth), node.name, node.kind);
    for child in &node.children {
        log_node(child, depth + 1);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = ViewerSettings::load();
    if let Some(level) = &args.log_level {
        settings.logging.level = level.clone();
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    if args.save_settings {
        settings.save().context("Failed to save settings")?;
        return Ok(());
    }

    let request = build_request(&args)?;
    info!("Starting load of '{}'", request.label());

    let client = ViewerClient::new(
        &settings.network.net_config(),
        settings.loader.clone(),
        Arc::new(LoggingSink),
    )
    .context("Failed to create viewer client")?;

    match client.load(request).wait() {
        Ok(LoadOutcome::Loaded(result)) => {
            for skipped in &result.skipped {
                warn!("{}", skipped);
                eprintln!("warning: {}", skipped.user_message());
            }
            let summary = result.document.summary();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} ({}): {} nodes, {} meshes, {} vertices, {} textures",
                    summary.name.as_deref().unwrap_or(&summary.source),
                    result.kind.label(),
                    summary.nodes,
                    summary.meshes,
                    summary.vertices,
                    summary.textures
                );
                if !summary.animations.is_empty() {
                    println!("animations: {}", summary.animations.join(", "));
                }
            }
            Ok(())
        }
        Ok(LoadOutcome::Superseded { generation }) => {
            warn!("Load superseded by generation {}", generation);
            Ok(())
        }
        Err(e) => {
            error!("{:?}", e);
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

/// Turn the command line into a load request. Directories become file sets;
/// single files are loaded through `file:` URLs so their siblings resolve.
fn build_request(args: &Args) -> Result<LoadRequest> {
    let request = if let Some(page) = &args.location {
        let url = location::from_page_url(page).context("No model URL found in page location")?;
        LoadRequest::from_url(url)
    } else {
        let input = args
            .input
            .as_deref()
            .context("Nothing to load: pass a file, directory or URL")?;
        let path = Path::new(input);
        if path.is_dir() {
            let mut files = AssetMap::new();
            collect_files(path, "", &mut files)?;
            info!("Collected {} files from {}", files.len(), path.display());
            LoadRequest::from_files(files)?
        } else if path.is_file() {
            let absolute = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            let url = Url::from_file_path(&absolute)
                .map_err(|_| anyhow::anyhow!("Cannot express {} as a URL", absolute.display()))?;
            LoadRequest::from_url(url.to_string())
        } else {
            LoadRequest::from_url(input)
        }
    };

    Ok(match &args.root {
        Some(root) => request.with_root_path(root.clone()),
        None => request,
    })
}

/// Read every file under `dir` into `files`, keyed by `/`-separated path
/// relative to the starting directory.
fn collect_files(dir: &Path, prefix: &str, files: &mut AssetMap) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{}{}", prefix, name);
        let path = entry.path();
        // Symlinked directories are not followed, so cycles cannot recurse.
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to inspect {}", path.display()))?;
        if file_type.is_dir() {
            collect_files(&path, &format!("{}/", key), files)?;
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            files.insert(key, bytes);
        }
    }
    Ok(())
}
