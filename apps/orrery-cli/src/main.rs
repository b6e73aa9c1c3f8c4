mod demo;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{UVec2, Vec3};
use orrery_assets::{ChannelPolicy, LoadPool, ModelLibrary};
use orrery_common::{EngineConfig, LogContext};
use orrery_ecs::{RigidBody, Transform};
use orrery_gpu::{GpuBackend, HeadlessDevice, HeadlessSwapchain};
use orrery_physics::SimplePhysics;
use orrery_render::{FrameDriver, FrameOutcome, RenderView, ViewportBlit};
use orrery_scene::Scene;
use orrery_tools::SceneInspector;

#[derive(Parser)]
#[command(name = "orrery", about = "Create, inspect, simulate and render orrery scenes")]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log filter, e.g. `debug` or `orrery_scene=trace`
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Write the demo scene to a file
    New {
        path: PathBuf,
        #[arg(short, long, default_value = "Demo")]
        name: String,
    },
    /// Print a scene's summary and hierarchy
    Inspect {
        path: PathBuf,
        /// Also list the properties of the named entity
        #[arg(short, long)]
        entity: Option<String>,
    },
    /// Step the physics simulation and print rigid body positions
    Simulate {
        path: PathBuf,
        #[arg(short, long, default_value = "120")]
        steps: u32,
        /// Write the simulated scene back to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render frames on the headless device and print its statistics
    Render {
        path: PathBuf,
        #[arg(short, long, default_value = "3")]
        frames: u32,
    },
}

struct Engine {
    config: EngineConfig,
    log: LogContext,
    device: Arc<HeadlessDevice>,
}

impl Engine {
    fn scene(&self, name: &str) -> anyhow::Result<Scene> {
        let backend: Arc<dyn GpuBackend> = self.device.clone();
        let physics = SimplePhysics::new(Vec3::new(0.0, self.config.physics.gravity, 0.0));
        let mut scene = Scene::with_config(name, backend.clone(), Box::new(physics), self.config.shadows)?;
        let pool = LoadPool::new(
            self.config.assets.resolved_worker_threads(),
            Some(self.log.clone()),
        );
        scene.set_model_library(Arc::new(ModelLibrary::new(
            backend,
            pool,
            ChannelPolicy::default(),
        )));
        Ok(scene)
    }

    fn load(&self, path: &Path) -> anyhow::Result<Scene> {
        let mut scene = self.scene("Untitled")?;
        scene
            .load(path)
            .with_context(|| format!("loading scene {}", path.display()))?;
        Ok(scene)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(filter) = cli.log_filter {
        config.log.filter = filter;
    }
    let log = LogContext::init(&config.log)?;
    let _guard = log.install();

    let engine = Engine {
        config,
        log,
        device: Arc::new(HeadlessDevice::new()),
    };

    match cli.command {
        Commands::Info => {
            println!("orrery v{}", env!("CARGO_PKG_VERSION"));
            println!("scene: {}", orrery_scene::crate_info());
            println!("render: {}", orrery_render::crate_info());
            println!("author: {}", orrery_author::crate_info());
            println!("tools: {}", orrery_tools::crate_info());
        }
        Commands::New { path, name } => {
            let mut scene = engine.scene(&name)?;
            demo::populate(&mut scene, &engine.config.shadows)?;
            scene.save(&path)?;
            println!("{}", SceneInspector::summary(&scene));
            println!("written to {}", path.display());
        }
        Commands::Inspect { path, entity } => {
            let scene = engine.load(&path)?;
            println!("{}", SceneInspector::summary(&scene));
            print!("{}", SceneInspector::hierarchy(&scene));
            if let Some(name) = entity {
                let info = scene
                    .find_by_name(&name)
                    .and_then(|e| SceneInspector::inspect_entity(&scene, e))
                    .with_context(|| format!("no entity named '{name}'"))?;
                print!("{info}");
            }
        }
        Commands::Simulate {
            path,
            steps,
            output,
        } => {
            let mut scene = engine.load(&path)?;
            let dt = engine.config.physics.fixed_timestep;
            for _ in 0..steps {
                scene.update()?;
                scene.step_physics(dt);
            }
            scene.update()?;

            println!("after {steps} steps of {dt:.4}s:");
            let bodies: Vec<_> = scene
                .registry()
                .view::<RigidBody>()
                .map(|(e, _)| e)
                .collect();
            for entity in bodies {
                let name = scene.entity_name(entity)?;
                match scene.get_component::<Transform>(entity) {
                    Ok(t) => println!(
                        "  {name}: ({:.3}, {:.3}, {:.3})",
                        t.position.x, t.position.y, t.position.z
                    ),
                    Err(_) => println!("  {name}: no transform"),
                }
            }
            if let Some(output) = output {
                scene.save(&output)?;
                println!("written to {}", output.display());
            }
        }
        Commands::Render { path, frames } => {
            let mut scene = engine.load(&path)?;
            let viewport = UVec2::new(engine.config.viewport.width, engine.config.viewport.height);
            let backend: Arc<dyn GpuBackend> = engine.device.clone();
            let swapchain = HeadlessSwapchain::new(
                engine.device.clone(),
                viewport,
                engine.config.render.swapchain_images,
            )?;
            let format = orrery_gpu::Swapchain::format(&swapchain);
            let mut driver = FrameDriver::new(
                backend.clone(),
                Box::new(swapchain),
                viewport,
                &engine.config.render,
            )?;
            let mut blit = ViewportBlit::new(backend, format)?;

            let mut presented = 0u32;
            for _ in 0..frames {
                let view = scene
                    .primary_camera()
                    .map(|(_, cc)| RenderView::from_camera(&cc.camera))
                    .unwrap_or_default();
                match driver.draw_frame(&mut scene, &view, &mut blit)? {
                    FrameOutcome::Presented { .. } => presented += 1,
                    FrameOutcome::Skipped => tracing::warn!("frame skipped"),
                }
            }
            drop(blit);
            drop(driver);
            engine.device.wait_idle();

            let stats = engine.device.stats();
            println!("presented {presented}/{frames} frames");
            println!(
                "submissions={} render_passes={} draws={} barriers={} buffer_uploads={}",
                stats.submissions, stats.render_passes, stats.draws, stats.barriers, stats.buffer_uploads
            );
            let violations = engine.device.violations();
            if violations.is_empty() {
                println!("no synchronization violations");
            } else {
                for violation in &violations {
                    println!("violation: {violation:?}");
                }
                anyhow::bail!("{} synchronization violations", violations.len());
            }
        }
    }

    Ok(())
}
