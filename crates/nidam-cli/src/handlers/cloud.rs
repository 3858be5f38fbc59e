//! `deploy`.

use crate::display;
use crate::DeployArgs;
use nidam_core::cloud::{self, list_cloud_targets};
use nidam_core::{DeploymentTarget, Nidam, SelectionPolicy};

pub async fn deploy(nidam: &Nidam, args: &DeployArgs, verbose: bool) -> anyhow::Result<()> {
    let package = super::resolve(nidam, &args.model, args.repo.as_deref(), verbose).await?;

    let target = match &args.instance_type {
        Some(name) => DeploymentTarget::cloud(name.as_str(), "", Vec::new()),
        None => {
            let targets = list_cloud_targets(nidam.catalog()).await?;
            let requirements = package.requirements();
            let policy = SelectionPolicy::default();
            if !targets.is_empty() {
                display::print_targets(&policy.rank(&requirements, targets.clone(), nidam.catalog())?);
            }
            let best = policy.best_target(&requirements, targets, nidam.catalog())?;
            println!("Recommended instance type: {}", best.target.name);
            best.target
        }
    };

    cloud::deploy(&package, Some(&target)).await?;
    println!();
    println!("Use this command to deploy again:");
    println!("  $ nidam deploy {} --instance-type {}", package, target.name);
    Ok(())
}
