//! `hello`, `model list` and `model get`.

use crate::display;
use nidam_core::{DeploymentTarget, ModelPackage, Nidam, NidamError, SelectionPolicy};
use tracing::debug;

/// Packages matching `tag`, best fit for `target` first. Scores include the
/// default selection overrides, so the runnable column agrees with `run`.
async fn ranked_packages(
    nidam: &Nidam,
    target: &DeploymentTarget,
    tag: Option<&str>,
    repo: Option<&str>,
    verbose: bool,
) -> anyhow::Result<Vec<(ModelPackage, f64)>> {
    nidam.ensure_repos(verbose).await?;
    let policy = SelectionPolicy::default();
    let mut scored: Vec<(ModelPackage, f64)> = nidam
        .find_packages(tag, repo)?
        .into_iter()
        .map(|p| {
            let score = nidam.evaluate(&p, target, &policy);
            (p, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored)
}

pub async fn hello(nidam: &Nidam, verbose: bool) -> anyhow::Result<()> {
    let target = nidam.local_target()?;
    display::print_target(&target);

    let packages = ranked_packages(nidam, &target, None, None, verbose).await?;
    if packages.is_empty() {
        println!("No model found, you probably need to update the model repo:");
        println!("  $ nidam repo update");
        return Err(NidamError::ModelNotFound {
            query: "any model".to_string(),
        }
        .into());
    }
    println!();
    display::print_packages(&packages, nidam.catalog());

    if let Some((best, score)) = packages.first() {
        println!();
        if *score > 0.0 {
            println!("Run the model in terminal:");
            println!("  $ nidam run {}", best);
            println!("Serve the model locally and get a chat server:");
            println!("  $ nidam serve {}", best);
        }
        println!("Deploy the model to the cloud:");
        println!("  $ nidam deploy {}", best);
    }
    Ok(())
}

pub async fn list(
    nidam: &Nidam,
    tag: Option<&str>,
    repo: Option<&str>,
    verbose: bool,
) -> anyhow::Result<()> {
    let target = nidam.local_target()?;
    let packages = ranked_packages(nidam, &target, tag, repo, verbose).await?;
    if packages.is_empty() {
        println!("No model found");
        return Ok(());
    }
    display::print_packages(&packages, nidam.catalog());
    Ok(())
}

pub async fn get(nidam: &Nidam, tag: &str, repo: Option<&str>, verbose: bool) -> anyhow::Result<()> {
    let package = super::resolve(nidam, tag, repo, verbose).await?;
    let environment_ready = nidam.check_environment(&package).unwrap_or_else(|e| {
        debug!("No environment status for {}: {}", package, e);
        false
    });
    let info = serde_json::json!({
        "tag": package.tag(),
        "repo": package.repo.name,
        "path": package.path,
        "environment_ready": environment_ready,
        "summary": package.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
