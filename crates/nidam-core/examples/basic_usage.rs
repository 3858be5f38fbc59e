//! Basic usage example - rank the models of a nidam home for this machine

use nidam_core::{Nidam, NidamPaths, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Get the nidam home from args or use NIDAM_HOME / ~/.nidam
    let paths = match std::env::args().nth(1) {
        Some(home) => NidamPaths::new(home),
        None => NidamPaths::from_env()?,
    };

    println!("Using nidam home: {}", paths.home().display());
    let nidam = Nidam::new(paths, false)?;

    let target = nidam.local_target()?;
    println!(
        "Platform {} with accelerators: {}",
        target.platform,
        target.accelerators_repr()
    );

    let packages = nidam.find_packages(None, None)?;
    if packages.is_empty() {
        println!("No models found, run `nidam repo update` first.");
    } else {
        println!("Found {} models:", packages.len());
        for package in packages {
            let score = nidam.score(&package, &target);
            println!("  - {} (score {:.3})", package, score);
        }
    }

    Ok(())
}
