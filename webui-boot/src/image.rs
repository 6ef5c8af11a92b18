//! Ordered build steps for the container image
//!
//! The image builder runs these once; the result is the read-only seed
//! tree that bootstrap copies into a cold volume. Extensions and models
//! are installed at runtime instead, so a failed download no longer
//! bakes a broken image.

use crate::config::ImageSpec;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildPlan {
    /// Base image description handed to the builder
    pub base: String,
    pub steps: Vec<String>,
}

pub fn render_build_steps(image: &ImageSpec, seed_root: &Path) -> BuildPlan {
    let seed = seed_root.display();
    let activate = format!("cd {seed} && . venv/bin/activate");

    let mut steps = Vec::new();

    if !image.apt_packages.is_empty() {
        steps.push(format!(
            "apt-get update && apt-get install -y {}",
            image.apt_packages.join(" ")
        ));
    }

    steps.push(format!(
        "pip install torch torchvision --index-url {}",
        image.torch_index_url
    ));
    steps.push("pip install xformers".to_string());

    let branch = image
        .reference
        .as_ref()
        .map(|r| format!(" --branch {r}"))
        .unwrap_or_default();
    steps.push(format!("git clone --depth 1{branch} {} {seed}", image.repo));

    steps.push(format!("cd {seed} && python3 -m venv venv"));
    steps.push(format!("{activate} && pip install --upgrade pip"));
    steps.push(format!("{activate} && pip install -r requirements.txt"));

    if !image.pip_packages.is_empty() {
        steps.push(format!(
            "{activate} && pip install {}",
            image.pip_packages.join(" ")
        ));
    }

    BuildPlan {
        base: format!("debian-slim python {}", image.python_version),
        steps,
    }
}
