use anyhow::{Context, Result};
use plantseg_workflow::{
    task_tracker, CallArgs, FunctionRegistry, Image, Returned, WorkflowRunner, WorkflowTracker,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Mock image operations. They only pass names around, which is all the
// tracker needs to see.

#[task_tracker(is_root, list_inputs("input_path"), list_private_params("stack_layout"))]
fn import_image(args: &CallArgs) -> Result<Returned> {
    let path: String = args.param("input_path")?;
    let stem = path
        .rsplit('/')
        .next()
        .and_then(|file| file.split('.').next())
        .unwrap_or("image");
    Ok(Returned::image(Image::new(stem)))
}

#[task_tracker]
fn gaussian_smoothing(args: &CallArgs) -> Result<Returned> {
    let image = args.image("image")?;
    let sigma: f64 = args.param("sigma")?;
    info!(image = image.name(), sigma, "Smoothing");
    Ok(Returned::image(Image::new(format!("{}_smoothed", image.name()))))
}

#[task_tracker(is_multioutput)]
fn split_channels(args: &CallArgs) -> Result<Returned> {
    let image = args.image("image")?;
    Ok(Returned::images([
        Image::new(format!("{}_nuclei", image.name())),
        Image::new(format!("{}_membrane", image.name())),
    ]))
}

#[task_tracker(is_leaf, list_inputs("output_directory"))]
fn export_image(args: &CallArgs) -> Result<Returned> {
    let image = args.image("image")?;
    let dir: String = args.param("output_directory")?;
    let format: String = args.param_opt("file_format")?.unwrap_or_else(|| "tiff".into());
    info!("Writing {}/{}.{}", dir, image.name(), format);
    Ok(Returned::Nothing)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = FunctionRegistry::new();
    let import = import_image_tracked(&registry)?;
    let smooth = gaussian_smoothing_tracked(&registry)?;
    let split = split_channels_tracked(&registry)?;
    let export = export_image_tracked(&registry)?;

    // Record an interactive session
    let mut tracker = WorkflowTracker::new(registry.clone());
    let raw = import.call(
        &mut tracker,
        CallArgs::new()
            .kw("input_path", "/data/sample.h5")
            .kw("stack_layout", "ZYX"),
    )?;
    let raw = raw.as_image().context("import returned no image")?.clone();
    let smoothed = smooth.call(
        &mut tracker,
        CallArgs::new().kw("image", raw.clone()).kw("sigma", 1.5),
    )?;
    // explored but never exported, pruned on save
    split.call(&mut tracker, CallArgs::new().kw("image", raw))?;
    export.call(
        &mut tracker,
        CallArgs::new()
            .kw("image", smoothed.as_image().context("smoothing returned no image")?.clone())
            .kw("output_directory", "/results")
            .kw("file_format", "h5"),
    )?;

    let path = std::env::temp_dir()
        .join("plantseg_workflow_demo")
        .join("workflow.yaml");
    tracker.save_to_yaml(&path)?;
    info!(path = %path.display(), tasks = tracker.dag().list_tasks.len(), "Saved workflow");

    // Replay it on other data
    let mut loader = WorkflowTracker::new(registry.clone());
    loader.from_yaml(&path)?;
    let batch: Vec<BTreeMap<String, _>> = ["/data/plant_a.h5", "/data/plant_b.h5"]
        .iter()
        .map(|input| {
            BTreeMap::from([
                ("input_path_0".to_string(), json!(input)),
                ("output_directory_0".to_string(), json!("/results/replay")),
            ])
        })
        .collect();
    let reports = WorkflowRunner::new(registry).run_batch(loader.dag(), &batch)?;
    for report in &reports {
        println!("ran {} tasks", report.executed.len());
    }

    Ok(())
}
