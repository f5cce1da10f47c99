// ============================================
// officedeploy - main.rs
// ============================================
// Command-line shell over the deployment core.
//
//   officedeploy scan [--json]
//   officedeploy fetch --family modern --arch x64 [--dest DIR]
//   officedeploy uninstall-config --select 1,3 [--out DIR]
//   officedeploy install-config --product-id ProPlus2021Volume ...
//   officedeploy clean
//
// Results go to stdout, logs to stderr and <log_dir>/application.log.
// The deployment tool itself is never started from here.
// ============================================

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use officedeploy::config::{default_settings_path, Settings};
use officedeploy::configuration::{partition_by_family, write_document};
use officedeploy::logging::init_logging;
use officedeploy::{
    Architecture, CancellationToken, DownloadOutcome, InstallOptions, Installation, OfficeCore, OfficeVersion,
    ProductFamily, Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "officedeploy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect, fetch and configure Office deployments", long_about = None)]
struct Cli {
    /// Settings file (default: officedeploy.toml next to the executable)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed Office products, one line per language
    Scan {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download the Office Deployment Tool for a product family
    Fetch {
        /// modern | 2013
        #[arg(long, default_value = "modern")]
        family: ProductFamily,
        /// x86 | x64
        #[arg(long, default_value = "x64")]
        arch: Architecture,
        /// Destination folder (default: the family's tool folder)
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },

    /// Write uninstall configuration for installations listed by `scan`
    UninstallConfig {
        /// 1-based row numbers from `scan`, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        select: Vec<usize>,
        /// Output root; one OfficeODT_<family> folder per family is used below it
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Write install configuration for a suite
    InstallConfig {
        #[arg(long)]
        product_id: String,
        #[arg(long)]
        channel: String,
        #[arg(long, default_value = "x64")]
        arch: Architecture,
        #[arg(long)]
        language: String,
        /// Apps to install (everything else offered is excluded)
        #[arg(long, value_delimiter = ',')]
        apps: Vec<String>,
        /// Apps the suite offers
        #[arg(long, value_delimiter = ',', default_value = "Word,Excel,PowerPoint,Outlook,Access,Publisher,OneNote,Teams,OneDrive,Lync")]
        available: Vec<String>,
        /// Also remove older MSI-based Office
        #[arg(long)]
        remove_msi: bool,
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Remove tool folders and leftover partial downloads
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let settings = Settings::load_or_default(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    let _guard = init_logging(&settings.log_dir(), &settings.logging).context("Failed to set up logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "officedeploy starting");

    let workspace = Workspace::from_settings(&settings);

    match cli.command {
        Commands::Scan { json } => {
            let core = OfficeCore::new(&settings)?;
            scan(&core, json)
        }
        Commands::Fetch { family, arch, dest } => {
            let core = OfficeCore::new(&settings)?;
            fetch(&core, &workspace, family, arch, dest)
        }
        Commands::UninstallConfig { select, out } => {
            let core = OfficeCore::new(&settings)?;
            uninstall_config(&core, &workspace, &select, out)
        }
        Commands::InstallConfig {
            product_id,
            channel,
            arch,
            language,
            apps,
            available,
            remove_msi,
            out,
        } => {
            let core = OfficeCore::new(&settings)?;
            let options = InstallOptions {
                version: OfficeVersion::new(product_id.clone(), product_id, channel),
                apps,
                available_apps: available,
                architecture: arch,
                language,
                remove_msi,
            };
            let document = core.build_install_document(&options)?;
            let dir = out.unwrap_or_else(|| workspace.tool_dir(options.version.family()));
            let path = write_document(&document, &dir)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Clean => clean(&workspace),
    }
}

fn scan(core: &OfficeCore, json: bool) -> Result<()> {
    let installations = core.scan_installations();

    if json {
        let text = serde_json::to_string_pretty(&installations).context("Failed to serialise scan results")?;
        println!("{}", text);
        return Ok(());
    }

    if installations.is_empty() {
        println!("No Office installations found.");
        return Ok(());
    }

    println!("{:>3}  {:<28} {:<7} {:<18} {:<17} {:<4} {}", "#", "PRODUCT", "LANG", "CHANNEL", "VERSION", "ARCH", "NAME");
    for (i, inst) in installations.iter().enumerate() {
        println!(
            "{:>3}  {:<28} {:<7} {:<18} {:<17} {:<4} {}",
            i + 1,
            inst.product_id,
            inst.culture,
            inst.channel,
            inst.version,
            inst.architecture,
            inst.display_name
        );
    }
    Ok(())
}

fn fetch(
    core: &OfficeCore,
    workspace: &Workspace,
    family: ProductFamily,
    arch: Architecture,
    dest: Option<PathBuf>,
) -> Result<()> {
    let dest = dest.unwrap_or_else(|| workspace.tool_dir(family));
    let cancel = CancellationToken::new();

    match core
        .fetch_artifact(family, arch, &dest, &cancel)
        .with_context(|| format!("Failed to fetch the deployment tool for {}", family))?
    {
        DownloadOutcome::Completed(path) => println!("{}", path.display()),
        DownloadOutcome::Cancelled => println!("Download cancelled."),
    }
    Ok(())
}

fn uninstall_config(core: &OfficeCore, workspace: &Workspace, select: &[usize], out: Option<PathBuf>) -> Result<()> {
    let installations = core.scan_installations();

    let mut selected: Vec<Installation> = Vec::new();
    for &row in select {
        match row.checked_sub(1).and_then(|i| installations.get(i)) {
            Some(inst) => selected.push(inst.clone()),
            None => bail!("No installation at row {} (scan found {})", row, installations.len()),
        }
    }

    // Each deployment tool generation only removes its own products
    for (family, group) in partition_by_family(&selected) {
        let document = core.build_uninstall_document(&group)?;
        let dir = match &out {
            Some(out) => Workspace::new(out).tool_dir(family),
            None => workspace.tool_dir(family),
        };
        let path = write_document(&document, &dir)?;
        println!("{}\t{}", family, path.display());
    }
    Ok(())
}

fn clean(workspace: &Workspace) -> Result<()> {
    let partials = workspace.sweep_partial_downloads();
    let (removed, errors) = workspace.clean();

    for dir in &removed {
        println!("Removed {}", dir.display());
    }
    if partials > 0 {
        println!("Removed {} partial download(s)", partials);
    }
    if !errors.is_empty() {
        bail!("Some folders could not be removed:\n  {}", errors.join("\n  "));
    }
    Ok(())
}
