//! Command handlers, split by domain.

mod clean;
mod cloud;
mod local;
mod models;
mod repos;

use crate::{Cli, Command, ModelCommand, RepoCommand};
use nidam_core::{ModelPackage, Nidam, NidamPaths};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let paths = NidamPaths::from_env()?;
    let verbose = cli.verbose;

    // Cleaning must not recreate what it is about to delete.
    if let Command::Clean(args) = cli.command {
        return clean::clean(&paths, &args).await;
    }

    let mut nidam = Nidam::new(paths, verbose)?;
    match cli.command {
        Command::Hello => models::hello(&nidam, verbose).await,
        Command::Serve(args) => local::serve(&nidam, &args, verbose).await,
        Command::Run(args) => local::run(&nidam, &args, verbose).await,
        Command::Deploy(args) => cloud::deploy(&nidam, &args, verbose).await,
        Command::Model { command } => match command {
            ModelCommand::List { tag, repo } => {
                models::list(&nidam, tag.as_deref(), repo.as_deref(), verbose).await
            }
            ModelCommand::Get { tag, repo } => {
                models::get(&nidam, &tag, repo.as_deref(), verbose).await
            }
        },
        Command::Repo { command } => match command {
            RepoCommand::List => repos::list(&nidam),
            RepoCommand::Update => repos::update(&nidam, verbose).await,
            RepoCommand::Add { name, url } => repos::add(&mut nidam, &name, &url),
            RepoCommand::Remove { name } => repos::remove(&mut nidam, &name),
        },
        Command::Clean(_) => Ok(()),
    }
}

/// Resolve `tag` after cloning any repo that was never fetched.
async fn resolve(
    nidam: &Nidam,
    tag: &str,
    repo: Option<&str>,
    verbose: bool,
) -> nidam_core::Result<ModelPackage> {
    nidam.ensure_repos(verbose).await?;
    nidam.resolve(tag, repo)
}
