//! `serve` and `run`.

use crate::{HardwareArgs, RunArgs, ServeArgs};
use nidam_core::local::{self, chat_ui_url, ensure_runnable, pick_port};
use nidam_core::{ModelPackage, Nidam, SelectionPolicy};

/// Resolve the model and check that this machine can run it.
async fn prepare(
    nidam: &Nidam,
    model: &str,
    repo: Option<&str>,
    hardware: &HardwareArgs,
    verbose: bool,
) -> anyhow::Result<ModelPackage> {
    let package = super::resolve(nidam, model, repo, verbose).await?;
    let target = nidam.local_target()?;
    let policy = SelectionPolicy::new(hardware.gpu.clone(), hardware.force_cpu);
    ensure_runnable(&package, &target, nidam.catalog(), &policy)?;
    Ok(package)
}

pub async fn serve(nidam: &Nidam, args: &ServeArgs, verbose: bool) -> anyhow::Result<()> {
    let package = prepare(nidam, &args.model, args.repo.as_deref(), &args.hardware, verbose).await?;
    println!("Access the Chat UI at {} (or with your IP)", chat_ui_url(args.port));
    local::serve(&package, nidam.environments(), args.port).await?;
    Ok(())
}

pub async fn run(nidam: &Nidam, args: &RunArgs, verbose: bool) -> anyhow::Result<()> {
    let package = prepare(nidam, &args.model, args.repo.as_deref(), &args.hardware, verbose).await?;
    let port = pick_port(args.port);
    local::run(&package, nidam.environments(), port, args.timeout).await?;
    Ok(())
}
