//! Terminal tables.

use nidam_core::{AcceleratorCatalog, DeploymentTarget, ModelPackage, RankedTarget, RepoInfo};
use tabled::{settings::Style, Table, Tabled};

const CHECKED: &str = "✔";

#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "model")]
    tag: String,
    #[tabled(rename = "repo")]
    repo: String,
    #[tabled(rename = "gpu")]
    gpu: String,
    #[tabled(rename = "platforms")]
    platforms: String,
    #[tabled(rename = "locally runnable")]
    runnable: String,
}

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "instance type")]
    name: String,
    #[tabled(rename = "accelerator")]
    accelerators: String,
    #[tabled(rename = "price/hr")]
    price: String,
    #[tabled(rename = "deployable")]
    deployable: String,
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "cloned")]
    cloned: String,
}

pub fn print_target(target: &DeploymentTarget) {
    println!("  Detected Platform: {}", target.platform);
    if target.accelerators.is_empty() {
        println!("  Detected Accelerators: None");
    } else {
        println!("  Detected Accelerators:");
        for a in &target.accelerators {
            println!("   - {} {}GB", a.model, a.memory_size);
        }
    }
    if let Some(cpu) = &target.cpu {
        let extensions: Vec<&str> = cpu.accelerations.iter().map(String::as_str).collect();
        println!(
            "  Detected CPU: {} ({} cores, {:.0}GB, {})",
            cpu.brand,
            cpu.cores,
            cpu.memory_gb,
            extensions.join(" ")
        );
    }
}

/// Packages with their score on the local machine.
pub fn print_packages(packages: &[(ModelPackage, f64)], catalog: &AcceleratorCatalog) {
    let rows: Vec<PackageRow> = packages
        .iter()
        .map(|(package, score)| PackageRow {
            tag: package.tag(),
            repo: package.repo.name.clone(),
            gpu: package.pretty_gpu(catalog),
            platforms: package.platforms().join(", "),
            runnable: if *score > 0.0 { CHECKED.to_string() } else { String::new() },
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_targets(targets: &[RankedTarget]) {
    let rows: Vec<TargetRow> = targets
        .iter()
        .map(|ranked| TargetRow {
            name: ranked.target.name.clone(),
            accelerators: ranked.target.accelerators_repr(),
            price: format!("${}", ranked.target.price),
            deployable: if ranked.score > 0.0 {
                CHECKED.to_string()
            } else {
                "insufficient res.".to_string()
            },
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_repos(repos: &[RepoInfo]) {
    let rows: Vec<RepoRow> = repos
        .iter()
        .map(|repo| RepoRow {
            name: repo.name.clone(),
            url: format!("{}@{}", repo.url, repo.branch),
            path: repo.path.display().to_string(),
            cloned: if repo.is_cloned() { CHECKED.to_string() } else { String::new() },
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}
