//! `clean`.

use crate::{CleanArgs, CleanKind};
use nidam_core::clean::clean as clean_targets;
use nidam_core::{CleanOutcome, CleanTarget, NidamPaths};

fn targets(kind: CleanKind) -> Vec<CleanTarget> {
    match kind {
        CleanKind::ModelCache => vec![CleanTarget::ModelCache],
        CleanKind::Venvs => vec![CleanTarget::Venvs],
        CleanKind::Repos => vec![CleanTarget::Repos],
        CleanKind::Configs => vec![CleanTarget::Configs],
        CleanKind::All => CleanTarget::ALL.to_vec(),
    }
}

pub async fn clean(paths: &NidamPaths, args: &CleanArgs) -> anyhow::Result<()> {
    // Without --yes nothing is removed.
    let dry_run = args.dry_run || !args.yes;
    let reports = clean_targets(&targets(args.kind), paths, dry_run).await?;

    for report in &reports {
        println!("{}", report);
    }
    let pending = reports
        .iter()
        .any(|r| matches!(r.outcome, CleanOutcome::WouldRemove { .. }));
    if pending && !args.dry_run {
        println!("Nothing was removed. Pass --yes to confirm.");
    }
    Ok(())
}
