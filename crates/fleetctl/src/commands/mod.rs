use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use fleetgrid_converge::{EngineConfig, LifecycleController};
use fleetgrid_state::{AttachmentKind, InMemoryControlPlane, SimWorld};

pub mod attach;
pub mod capacity;
pub mod refresh;
pub mod teardown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    LoadBalancer,
    TargetGroup,
    TrafficSource,
}

impl From<KindArg> for AttachmentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::LoadBalancer => AttachmentKind::LoadBalancer,
            KindArg::TargetGroup => AttachmentKind::TargetGroup,
            KindArg::TrafficSource => AttachmentKind::TrafficSource,
        }
    }
}

/// A loaded world plus the controller that drives it.
pub struct Session {
    pub plane: InMemoryControlPlane,
    pub controller: LifecycleController<InMemoryControlPlane>,
    pub format: OutputFormat,
}

impl Session {
    pub fn load(
        world: &Path,
        config: Option<&Path>,
        format: OutputFormat,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(world)
            .with_context(|| format!("reading world fixture {}", world.display()))?;
        let world = parse_world(&text)?;

        let config = match config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        let plane = InMemoryControlPlane::from_world(world);
        let controller =
            LifecycleController::with_cancellation(Arc::new(plane.clone()), config, shutdown);
        Ok(Self {
            plane,
            controller,
            format,
        })
    }

    /// Print a result in the selected format.
    pub fn emit(&self, text: &str, json: serde_json::Value) {
        match self.format {
            OutputFormat::Text => println!("{text}"),
            OutputFormat::Json => println!("{json}"),
        }
    }

    /// Print the number of control plane calls the operation needed.
    pub fn summarize_calls(&self) {
        if self.format == OutputFormat::Text {
            println!("  Control plane calls: {}", self.plane.calls().len());
        }
    }
}

pub fn parse_world(text: &str) -> anyhow::Result<SimWorld> {
    toml::from_str(text).context("parsing world fixture")
}
