//! `repo list|update|add|remove`.

use crate::display;
use nidam_core::package::{add_repo, remove_repo};
use nidam_core::Nidam;

pub fn list(nidam: &Nidam) -> anyhow::Result<()> {
    display::print_repos(&nidam.repos(None)?);
    Ok(())
}

pub async fn update(nidam: &Nidam, verbose: bool) -> anyhow::Result<()> {
    let repos = nidam.update_repos(verbose).await?;
    println!("Updated {} repo(s)", repos.len());
    Ok(())
}

pub fn add(nidam: &mut Nidam, name: &str, url: &str) -> anyhow::Result<()> {
    let mut config = nidam.config().clone();
    let repo = add_repo(&mut config, &nidam.paths().repos_dir(), name, url)?;
    nidam.save_config(config)?;
    println!("Repo {} added", repo);
    println!("Fetch its models with:");
    println!("  $ nidam repo update");
    Ok(())
}

pub fn remove(nidam: &mut Nidam, name: &str) -> anyhow::Result<()> {
    let mut config = nidam.config().clone();
    remove_repo(&mut config, name)?;
    nidam.save_config(config)?;
    println!("Repo {} removed", name);
    Ok(())
}
