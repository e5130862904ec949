//! Capture behaviour of the workflow tracker

use anyhow::Result;
use plantseg_workflow::{
    Arg, CallArgs, FunctionRegistry, Image, NodeType, Returned, SharedTracker,
    TrackedTask, WorkflowError, WorkflowTracker, INPUT_PLACEHOLDER,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn import_image(args: &CallArgs) -> Result<Returned> {
    let _path: String = args.param("input_path")?;
    let name: String = args.param("image_name")?;
    Ok(Returned::image(Image::new(name)))
}

fn gaussian_smoothing(args: &CallArgs) -> Result<Returned> {
    let image = args.image("image")?;
    let _sigma: f64 = args.param("sigma")?;
    Ok(Returned::image(Image::new(format!("{}_smoothed", image.name()))))
}

fn split(args: &CallArgs) -> Result<Returned> {
    let image = args.image("image")?;
    Ok(Returned::images([
        Image::new(format!("{}_m1", image.name())),
        Image::new(format!("{}_m2", image.name())),
    ]))
}

fn export_image(args: &CallArgs) -> Result<Returned> {
    args.image("image")?;
    Ok(Returned::Nothing)
}

struct Tasks {
    import: TrackedTask,
    smooth: TrackedTask,
    split: TrackedTask,
    export: TrackedTask,
}

fn setup() -> (WorkflowTracker, Tasks) {
    let registry = FunctionRegistry::new();
    let tasks = Tasks {
        import: TrackedTask::builder("import_image", import_image)
            .root()
            .list_inputs(["input_path"])
            .list_private_params(["semantic_type", "stack_layout"])
            .register(&registry)
            .unwrap(),
        smooth: TrackedTask::builder("gaussian_smoothing", gaussian_smoothing)
            .register(&registry)
            .unwrap(),
        split: TrackedTask::builder("split", split)
            .multi_output()
            .register(&registry)
            .unwrap(),
        export: TrackedTask::builder("export_image", export_image)
            .leaf()
            .list_inputs(["output_directory"])
            .register(&registry)
            .unwrap(),
    };
    (WorkflowTracker::new(registry), tasks)
}

fn import_args(path: &str) -> CallArgs {
    CallArgs::new()
        .kw("input_path", path)
        .kw("key", "raw")
        .kw("image_name", "raw")
        .kw("semantic_type", "raw")
        .kw("stack_layout", "ZYX")
}

#[test]
fn test_capture_classifies_arguments() {
    let (mut tracker, tasks) = setup();

    let raw = tasks.import.call(&mut tracker, import_args("/data/raw.h5")).unwrap();
    let raw = raw.as_image().unwrap().clone();
    let smoothed = tasks
        .smooth
        .call(
            &mut tracker,
            CallArgs::new().kw("image", raw.clone()).kw("sigma", 1.5),
        )
        .unwrap();

    let dag = tracker.dag();
    assert_eq!(dag.list_tasks.len(), 2);

    let import_task = &dag.list_tasks[0];
    assert_eq!(import_task.func, "import_image");
    assert_eq!(import_task.node_type, NodeType::Root);
    assert_eq!(import_task.images_inputs["input_path"], "input_path_0");
    assert_eq!(import_task.parameters["semantic_type"], json!("raw"));
    assert!(!import_task.parameters.contains_key("input_path"));
    assert_eq!(
        import_task.list_private_parameters,
        vec!["semantic_type".to_string(), "stack_layout".to_string()]
    );
    assert_eq!(import_task.outputs, vec![raw.unique_name().to_string()]);
    assert_eq!(dag.inputs["input_path_0"], json!(INPUT_PLACEHOLDER));

    let smooth_task = &dag.list_tasks[1];
    assert_eq!(smooth_task.node_type, NodeType::Node);
    assert_eq!(smooth_task.images_inputs["image"], raw.unique_name());
    assert_eq!(smooth_task.parameters["sigma"], json!(1.5));
    assert_eq!(
        smooth_task.outputs,
        vec![smoothed.as_image().unwrap().unique_name().to_string()]
    );
    assert_ne!(import_task.id, smooth_task.id);
}

#[test]
fn test_result_is_returned_unchanged() {
    let (mut tracker, tasks) = setup();
    let returned = tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    let image = returned.as_image().unwrap();
    assert_eq!(image.name(), "raw");
    assert_eq!(tracker.dag().list_tasks[0].outputs[0], image.unique_name());
}

#[test]
fn test_task_count_matches_successful_calls() {
    let (mut tracker, tasks) = setup();
    let mut successes = 0;
    for i in 0..5 {
        let args = if i % 2 == 0 {
            import_args("x.h5")
        } else {
            // missing private parameter
            CallArgs::new().kw("input_path", "x.h5").kw("image_name", "raw")
        };
        if tasks.import.call(&mut tracker, args).is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 3);
    assert_eq!(tracker.dag().list_tasks.len(), successes);
}

#[test]
fn test_externalized_inputs_are_numbered() {
    let (mut tracker, tasks) = setup();
    for _ in 0..3 {
        tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    }
    assert_eq!(
        tracker.dag().list_inputs(),
        vec!["input_path_0", "input_path_1", "input_path_2"]
    );
}

#[test]
fn test_positional_argument_rejected_before_recording() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let registry = FunctionRegistry::new();
    let task = TrackedTask::builder("counted", move |_: &CallArgs| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Returned::Nothing)
    })
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);

    let err = task
        .call(&mut tracker, CallArgs::new().positional(1.0))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Usage { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(tracker.dag().list_tasks.is_empty());
}

#[test]
fn test_missing_private_parameter() {
    let (mut tracker, tasks) = setup();
    let args = CallArgs::new()
        .kw("input_path", "a.h5")
        .kw("image_name", "raw")
        .kw("semantic_type", "raw");
    let err = tasks.import.call(&mut tracker, args).unwrap_err();
    match err {
        WorkflowError::Configuration { field, .. } => {
            assert_eq!(field.as_deref(), Some("stack_layout"))
        }
        other => panic!("Expected configuration error, got {:?}", other),
    }
    assert!(tracker.dag().list_tasks.is_empty());
    assert!(tracker.dag().inputs.is_empty());
}

#[test]
fn test_private_parameter_cannot_be_an_image() {
    let registry = FunctionRegistry::new();
    let task = TrackedTask::builder("needs_scalar", |_: &CallArgs| Ok(Returned::Nothing))
        .list_private_params(["mode"])
        .register(&registry)
        .unwrap();
    let mut tracker = WorkflowTracker::new(registry);
    let err = task
        .call(&mut tracker, CallArgs::new().kw("mode", Image::new("m")))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Configuration { .. }));
}

#[test]
fn test_unsupported_return_leaves_dag_unchanged() {
    let registry = FunctionRegistry::new();
    let bad = TrackedTask::builder("returns_number", |_: &CallArgs| {
        Ok(Returned::Single(Arg::from(42.0)))
    })
    .list_inputs(["path"])
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);

    let before = tracker.dag().clone();
    let err = bad
        .call(&mut tracker, CallArgs::new().kw("path", "a.h5"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Type { .. }));
    assert_eq!(tracker.dag(), &before);
}

/// Root task producing an image named `raw` without any arguments
fn load_raw(registry: &FunctionRegistry) -> TrackedTask {
    TrackedTask::builder("load_raw", |_: &CallArgs| {
        Ok(Returned::image(Image::new("raw")))
    })
    .root()
    .register(registry)
    .unwrap()
}

#[test]
fn test_tuple_requires_multi_output() {
    let registry = FunctionRegistry::new();
    let load = load_raw(&registry);
    let task = TrackedTask::builder("split", split).register(&registry).unwrap();
    let mut tracker = WorkflowTracker::new(registry);
    let raw = load.call(&mut tracker, CallArgs::new()).unwrap();
    let err = task
        .call(
            &mut tracker,
            CallArgs::new().kw("image", raw.as_image().unwrap().clone()),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Type { .. }));
    assert_eq!(tracker.dag().list_tasks.len(), 1);
}

#[test]
fn test_multi_output_records_every_image() {
    let (mut tracker, tasks) = setup();
    let raw = tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    let returned = tasks
        .split
        .call(
            &mut tracker,
            CallArgs::new().kw("image", raw.as_image().unwrap().clone()),
        )
        .unwrap();
    let names: Vec<String> = returned
        .image_list()
        .iter()
        .map(|img| img.unique_name().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert_eq!(tracker.dag().list_tasks[1].outputs, names);
}

#[test]
fn test_multi_output_rejects_non_image_element() {
    let registry = FunctionRegistry::new();
    let task = TrackedTask::builder("mixed", |_: &CallArgs| {
        Ok(Returned::Tuple(vec![
            Arg::from(Image::new("a")),
            Arg::from("not an image"),
        ]))
    })
    .multi_output()
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);
    let err = task.call(&mut tracker, CallArgs::new()).unwrap_err();
    assert!(err.to_string().contains("mixed"));
    assert!(tracker.dag().list_tasks.is_empty());
}

#[test]
fn test_output_colliding_with_input_is_rejected() {
    let registry = FunctionRegistry::new();
    let load = load_raw(&registry);
    let identity = TrackedTask::builder("identity", |args: &CallArgs| {
        Ok(Returned::Single(Arg::Image(args.image("image")?.clone())))
    })
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);
    let raw = load.call(&mut tracker, CallArgs::new()).unwrap();
    let err = identity
        .call(
            &mut tracker,
            CallArgs::new().kw("image", raw.as_image().unwrap().clone()),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Integrity { .. }));
    assert_eq!(tracker.dag().list_tasks.len(), 1);
}

#[test]
fn test_image_without_producer_rejected_before_running() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let registry = FunctionRegistry::new();
    let smooth = TrackedTask::builder("smooth", move |args: &CallArgs| {
        counter.fetch_add(1, Ordering::SeqCst);
        let image = args.image("image")?;
        Ok(Returned::image(image_derived(image.name())))
    })
    .list_inputs(["output_directory"])
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);

    let err = smooth
        .call(
            &mut tracker,
            CallArgs::new()
                .kw("image", Image::new("raw"))
                .kw("output_directory", "/out"),
        )
        .unwrap_err();
    match err {
        WorkflowError::Integrity { message } => assert!(message.contains("'image'")),
        other => panic!("Expected integrity error, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(tracker.dag().list_tasks.is_empty());
    assert!(tracker.dag().inputs.is_empty());
}

fn image_derived(name: &str) -> Image {
    Image::new(format!("{}_smoothed", name))
}

#[test]
fn test_function_failure_is_not_recorded() {
    let registry = FunctionRegistry::new();
    let failing = TrackedTask::builder("failing", |_: &CallArgs| -> Result<Returned> {
        Err(anyhow::anyhow!("segmentation exploded"))
    })
    .list_inputs(["path"])
    .register(&registry)
    .unwrap();
    let mut tracker = WorkflowTracker::new(registry);
    let err = failing
        .call(&mut tracker, CallArgs::new().kw("path", "a.h5"))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Execution { .. }));
    assert!(tracker.dag().list_tasks.is_empty());
    assert!(tracker.dag().inputs.is_empty());
}

#[test]
fn test_unregistered_function_rejected() {
    let task = TrackedTask::builder("orphan", export_image).build().unwrap();
    let mut tracker = WorkflowTracker::new(FunctionRegistry::new());
    let err = task
        .call(&mut tracker, CallArgs::new().kw("image", Image::new("raw")))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Usage { .. }));
}

#[test]
fn test_clean_dag_resets_everything() {
    let (mut tracker, tasks) = setup();
    tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    tracker.clean_dag();
    assert!(tracker.dag().list_tasks.is_empty());
    assert!(tracker.dag().inputs.is_empty());
    tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    assert_eq!(tracker.dag().list_inputs(), vec!["input_path_0"]);
}

#[test]
fn test_shared_tracker_across_threads() {
    let (mut tracker, tasks) = setup();
    let raw = tasks.import.call(&mut tracker, import_args("a.h5")).unwrap();
    let raw = raw.as_image().unwrap().clone();
    let shared = SharedTracker::new(tracker);
    let smooth = Arc::new(tasks.smooth);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let shared = shared.clone();
            let smooth = smooth.clone();
            let raw = raw.clone();
            std::thread::spawn(move || {
                shared
                    .call(
                        &smooth,
                        CallArgs::new()
                            .kw("image", raw)
                            .kw("sigma", f64::from(i)),
                    )
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(shared.session().unwrap().dag().list_tasks.len(), 5);
}
