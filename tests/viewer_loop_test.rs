use std::{cell::RefCell, rc::Rc, time::Duration};

use flow_viewer::{
    Viewer, ViewerError,
    context::{CUBE_ASSET, LoadMode, SHADER_ASSET, ViewerConfig},
    flow::{LoopState, PendingLoad},
    render::RenderCommand,
    resources::DroppedFile,
};
use serde_json::json;

use crate::common::test_utils::{GltfBuilder, MemoryFiles, RecordingBackend};

mod common;

/// One node per entry, all drawing the same single triangle mesh.
fn scene_with_nodes(count: usize) -> GltfBuilder {
    let mut gltf = GltfBuilder::new();
    let mesh = gltf.triangle_mesh(Some("Tri"), 1);
    let nodes: Vec<usize> = (0..count).map(|_| gltf.node(json!({ "mesh": mesh }))).collect();
    gltf.scene(&nodes);
    gltf
}

/// A root drawing a triangle with two children drawing the same triangle.
fn root_with_children() -> Vec<u8> {
    let mut gltf = GltfBuilder::new();
    let mesh = gltf.triangle_mesh(Some("Tri"), 1);
    let root = gltf.node(json!({ "mesh": mesh }));
    let left = gltf.node(json!({ "mesh": mesh, "translation": [-1.0, 0.0, 0.0] }));
    let right = gltf.node(json!({ "mesh": mesh, "translation": [1.0, 0.0, 0.0] }));
    gltf.adopt(root, left);
    gltf.adopt(root, right);
    gltf.scene(&[root]);
    gltf.build()
}

fn viewer(files: MemoryFiles) -> Viewer<RecordingBackend, MemoryFiles> {
    Viewer::new(RecordingBackend::new(), files, test_config())
}

fn test_config() -> ViewerConfig {
    ViewerConfig::default().with_error_backoff(Duration::from_millis(1))
}

type Statuses = Rc<RefCell<Vec<Option<String>>>>;
type Errors = Rc<RefCell<Vec<String>>>;

fn observed(viewer: Viewer<RecordingBackend, MemoryFiles>) -> (Viewer<RecordingBackend, MemoryFiles>, Statuses, Errors) {
    let statuses: Statuses = Rc::default();
    let errors: Errors = Rc::default();
    let (s, e) = (statuses.clone(), errors.clone());
    let viewer = viewer
        .with_status_callback(move |status| s.borrow_mut().push(status.map(str::to_string)))
        .with_error_callback(move |error| e.borrow_mut().push(format!("{:?}", error)));
    (viewer, statuses, errors)
}

fn only_fallback_cube(viewer: &Viewer<RecordingBackend, MemoryFiles>) -> bool {
    viewer.actors().len() == 1 && viewer.actors()[0].geometry == CUBE_ASSET && viewer.actors()[0].ordinal == 0
}

#[tokio::test]
async fn should_create_default_assets_once() {
    let mut viewer = viewer(MemoryFiles::new());
    viewer.tick().await.unwrap();
    viewer.tick().await.unwrap();

    let backend = viewer.backend();
    assert_eq!(backend.shaders.len(), 1);
    assert_eq!(backend.geometries.len(), 1);
    assert!(viewer.context().assets.has_shader(SHADER_ASSET));
    assert!(viewer.context().assets.has_geometry(CUBE_ASSET));
    assert_eq!(backend.frames.len(), 2);
    assert_eq!(backend.last_frame().len(), 1);
    assert_eq!(viewer.state(), LoopState::Idle);
}

#[tokio::test]
async fn should_only_load_the_latest_request() {
    let files = MemoryFiles::new()
        .with("a.gltf", scene_with_nodes(1).build())
        .with("b.gltf", scene_with_nodes(2).build());
    let (mut viewer, statuses, _) = observed(viewer(files));

    viewer.load("a.gltf");
    viewer.handle().reload("b.gltf");
    viewer.tick().await.unwrap();
    viewer.tick().await.unwrap();

    assert_eq!(viewer.actors().len(), 2);
    assert!(viewer.actors().iter().all(|actor| actor.geometry.starts_with("b.gltf#")));
    assert!(!statuses.borrow().iter().flatten().any(|status| status.contains("a.gltf")));
}

#[tokio::test]
async fn should_report_load_progress_in_order() {
    let files = MemoryFiles::new().with("scene.gltf", scene_with_nodes(1).build());
    let (mut viewer, statuses, errors) = observed(viewer(files));

    viewer.load("scene.gltf");
    viewer.tick().await.unwrap();

    assert_eq!(
        *statuses.borrow(),
        vec![
            Some("Loading scene.gltf...".to_string()),
            Some("Loaded scene.gltf".to_string()),
            None,
        ]
    );
    assert!(errors.borrow().is_empty());
}

#[tokio::test]
async fn should_report_external_buffers_while_loading() {
    let (scene, bin) = scene_with_nodes(1).build_external("scene.bin");
    let files = MemoryFiles::new()
        .with("models/scene.gltf", scene)
        .with("models/scene.bin", bin);
    let (mut viewer, statuses, _) = observed(viewer(files));

    viewer.load("models/scene.gltf");
    viewer.tick().await.unwrap();

    assert_eq!(
        statuses.borrow()[..2],
        [
            Some("Loading models/scene.gltf...".to_string()),
            Some("Loading models/scene.bin...".to_string()),
        ]
    );
}

#[tokio::test]
async fn should_fall_back_to_cube_for_empty_scene() {
    let mut gltf = GltfBuilder::new();
    gltf.triangle_mesh(None, 1);
    let empty = gltf.node(json!({ "name": "nothing to draw" }));
    gltf.scene(&[empty]);
    let files = MemoryFiles::new().with("empty.gltf", gltf.build());
    let (mut viewer, statuses, errors) = observed(viewer(files));

    viewer.load("empty.gltf");
    viewer.tick().await.unwrap();

    assert!(only_fallback_cube(&viewer));
    assert!(viewer.clips().is_empty());
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].starts_with("EmptyScene"));
    assert_eq!(statuses.borrow().last(), Some(&None));
    assert_eq!(viewer.backend().draw_count(), 1);
}

#[tokio::test]
async fn should_fall_back_to_cube_for_missing_file() {
    let (mut viewer, _, errors) = observed(viewer(MemoryFiles::new()));

    viewer.load("missing.gltf");
    assert!(viewer.tick().await.is_ok());

    assert!(only_fallback_cube(&viewer));
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].starts_with("LoadFailure"));
}

#[tokio::test]
async fn should_replace_previous_scene_with_fallback_after_failure() {
    let files = MemoryFiles::new().with("scene.gltf", scene_with_nodes(3).build());
    let mut viewer = viewer(files);
    viewer.load("scene.gltf");
    viewer.tick().await.unwrap();
    assert_eq!(viewer.actors().len(), 3);

    viewer.load("broken.gltf");
    viewer.tick().await.unwrap();
    assert!(only_fallback_cube(&viewer));
}

#[tokio::test]
async fn should_draw_root_and_children() {
    let files = MemoryFiles::new().with("tree.gltf", root_with_children());
    let mut viewer = viewer(files);

    viewer.load("tree.gltf");
    viewer.tick().await.unwrap();

    let backend = viewer.backend();
    assert_eq!(backend.draw_count(), 3);
    assert!(matches!(backend.last_frame()[0], RenderCommand::SetRenderTarget { target: None, .. }));
    // cube plus one shared triangle
    assert_eq!(backend.geometries.len(), 2);
    let ordinals: Vec<usize> = viewer.actors().iter().map(|actor| actor.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
}

#[tokio::test]
async fn should_draw_children_of_meshless_root() {
    let mut gltf = GltfBuilder::new();
    let left_mesh = gltf.triangle("Left", [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let right_mesh = gltf.triangle("Right", [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    let root = gltf.node(json!({ "name": "root" }));
    let left = gltf.node(json!({ "mesh": left_mesh }));
    let right = gltf.node(json!({ "mesh": right_mesh }));
    gltf.adopt(root, left);
    gltf.adopt(root, right);
    gltf.scene(&[root]);
    let files = MemoryFiles::new().with("pair.gltf", gltf.build());
    let mut viewer = viewer(files);

    viewer.load("pair.gltf");
    viewer.tick().await.unwrap();

    let actors: Vec<(&str, usize)> = viewer
        .actors()
        .iter()
        .map(|actor| (actor.geometry.as_str(), actor.ordinal))
        .collect();
    assert_eq!(actors, vec![("pair.gltf#Left/0", 0), ("pair.gltf#Right/0", 1)]);
    // cube plus one geometry per child
    assert_eq!(viewer.backend().geometries.len(), 3);
    assert_eq!(viewer.backend().last_frame().len(), 3);
    assert_eq!(viewer.backend().draw_count(), 2);
}

fn single_triangle(second_vertex: [f32; 3]) -> Vec<u8> {
    let [x, y, z] = second_vertex;
    let mut gltf = GltfBuilder::new();
    let mesh = gltf.triangle("Tri", [0.0, 0.0, 0.0, x, y, z, 0.0, 1.0, 0.0]);
    let node = gltf.node(json!({ "mesh": mesh }));
    gltf.scene(&[node]);
    gltf.build()
}

fn drawn_geometries(viewer: &Viewer<RecordingBackend, MemoryFiles>) -> Vec<usize> {
    viewer
        .backend()
        .last_frame()
        .iter()
        .filter_map(|command| match command {
            RenderCommand::Draw { geometry, .. } => Some(*geometry),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn should_recompile_geometry_when_same_file_is_dropped_again() {
    let mut viewer = viewer(MemoryFiles::new());
    let dropped = |contents: Vec<u8>| {
        vec![DroppedFile {
            name: "m.gltf".to_string(),
            contents,
        }]
    };

    viewer.on_dropped_files(dropped(single_triangle([1.0, 0.0, 0.0]))).unwrap();
    viewer.tick().await.unwrap();
    viewer.on_dropped_files(dropped(single_triangle([9.0, 0.0, 0.0]))).unwrap();
    viewer.tick().await.unwrap();

    let drawn = drawn_geometries(&viewer);
    assert_eq!(drawn.len(), 1);
    let geometry = &viewer.backend().geometries[drawn[0]];
    assert_eq!(geometry.vertices[1].position, [9.0, 0.0, 0.0]);
    // shader, cube and the current triangle only
    assert_eq!(viewer.context().assets.len(), 3);
}

#[tokio::test]
async fn should_evict_geometry_of_replaced_scene() {
    let files = MemoryFiles::new()
        .with("a.gltf", single_triangle([1.0, 0.0, 0.0]))
        .with("b.gltf", single_triangle([2.0, 0.0, 0.0]));
    let mut viewer = viewer(files);

    viewer.load("a.gltf");
    viewer.tick().await.unwrap();
    viewer.load("b.gltf");
    viewer.tick().await.unwrap();

    let assets = &viewer.context().assets;
    assert!(!assets.has_geometry("a.gltf#Tri/0"));
    assert!(assets.has_geometry("b.gltf#Tri/0"));
    assert!(assets.has_geometry(CUBE_ASSET));
    assert!(assets.has_shader(SHADER_ASSET));
}

#[tokio::test]
async fn should_keep_geometry_of_earlier_scenes_when_appending() {
    let files = MemoryFiles::new()
        .with("a.gltf", single_triangle([1.0, 0.0, 0.0]))
        .with("b.gltf", single_triangle([2.0, 0.0, 0.0]));
    let config = test_config().with_load_mode(LoadMode::Append);
    let mut viewer = Viewer::new(RecordingBackend::new(), files, config);

    viewer.load("a.gltf");
    viewer.tick().await.unwrap();
    viewer.load("b.gltf");
    viewer.tick().await.unwrap();

    assert!(viewer.context().assets.has_geometry("a.gltf#Tri/0"));
    assert!(viewer.context().assets.has_geometry("b.gltf#Tri/0"));
    assert_eq!(viewer.backend().draw_count(), 2);
}

#[tokio::test]
async fn should_drop_scene_geometry_when_falling_back_to_cube() {
    let files = MemoryFiles::new().with("a.gltf", single_triangle([1.0, 0.0, 0.0]));
    let mut viewer = viewer(files);

    viewer.load("a.gltf");
    viewer.tick().await.unwrap();
    viewer.load("missing.gltf");
    viewer.tick().await.unwrap();

    assert!(only_fallback_cube(&viewer));
    assert!(!viewer.context().assets.has_geometry("a.gltf#Tri/0"));
}

#[tokio::test]
async fn should_swallow_submission_failures() {
    let backend = RecordingBackend {
        fail_submit: true,
        ..Default::default()
    };
    let mut viewer = Viewer::new(backend, MemoryFiles::new(), test_config());

    assert!(viewer.tick().await.is_ok());
    assert_eq!(viewer.backend().submit_calls, 1);
    assert!(viewer.backend().frames.is_empty());
    assert_eq!(viewer.state(), LoopState::Idle);
}

#[tokio::test]
async fn should_fail_frame_when_default_shader_cannot_be_created() {
    let backend = RecordingBackend {
        fail_shader: true,
        ..Default::default()
    };
    let mut viewer = Viewer::new(backend, MemoryFiles::new(), test_config());

    let result = viewer.tick().await;
    assert!(matches!(result, Err(ViewerError::TransientFrameFailure(_))));
    assert_eq!(viewer.backend().submit_calls, 0);
}

#[tokio::test]
async fn should_continue_ordinals_when_appending() {
    let files = MemoryFiles::new()
        .with("a.gltf", scene_with_nodes(2).build())
        .with("b.gltf", scene_with_nodes(1).build());
    let config = test_config().with_load_mode(LoadMode::Append);
    let mut viewer = Viewer::new(RecordingBackend::new(), files, config);

    viewer.load("a.gltf");
    viewer.tick().await.unwrap();
    viewer.load("b.gltf");
    viewer.tick().await.unwrap();

    let ordinals: Vec<usize> = viewer.actors().iter().map(|actor| actor.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    assert_eq!(viewer.backend().draw_count(), 3);
}

#[tokio::test]
async fn should_restart_ordinals_when_replacing() {
    let files = MemoryFiles::new()
        .with("a.gltf", scene_with_nodes(2).build())
        .with("b.gltf", scene_with_nodes(1).build());
    let mut viewer = viewer(files);

    viewer.load("a.gltf");
    viewer.tick().await.unwrap();
    viewer.load("b.gltf");
    viewer.tick().await.unwrap();

    assert_eq!(viewer.actors().len(), 1);
    assert_eq!(viewer.actors()[0].ordinal, 0);
    assert!(viewer.actors()[0].geometry.starts_with("b.gltf#"));
}

#[tokio::test]
async fn should_tear_down_when_closed() {
    let files = MemoryFiles::new().with("scene.gltf", scene_with_nodes(1).build());
    let mut viewer = viewer(files);
    let handle = viewer.handle();
    viewer.load("scene.gltf");
    viewer.tick().await.unwrap();

    handle.close();
    viewer.run().await;

    assert!(!handle.is_alive());
    assert!(viewer.context().assets.is_empty());
    assert!(viewer.actors().is_empty());
    assert_eq!(viewer.backend().frames.len(), 1);
}

#[tokio::test]
async fn should_yield_between_frames_so_close_is_observed() {
    let mut viewer = viewer(MemoryFiles::new());
    let handle = viewer.handle();
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async move {
            let running = tokio::task::spawn_local(async move {
                viewer.run().await;
                viewer
            });
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            handle.close();

            let viewer = running.await.unwrap();
            assert!(!viewer.is_alive());
            assert!(viewer.context().assets.is_empty());
        })
        .await;
}

#[tokio::test]
async fn should_stop_running_once_backend_is_gone() {
    let backend = RecordingBackend {
        max_frames: Some(3),
        ..Default::default()
    };
    let mut viewer = Viewer::new(backend, MemoryFiles::new(), test_config());

    viewer.run().await;

    assert_eq!(viewer.backend().submit_calls, 3);
    assert!(viewer.context().assets.is_empty());
    assert!(!viewer.is_alive());
}

#[tokio::test]
async fn should_load_dropped_files_from_cache() {
    let (scene, bin) = scene_with_nodes(2).build_external("fox.bin");
    let mut viewer = viewer(MemoryFiles::new());

    let dropped = vec![
        DroppedFile {
            name: "fox.bin".to_string(),
            contents: bin,
        },
        DroppedFile {
            name: "fox.gltf".to_string(),
            contents: scene,
        },
    ];
    viewer.on_dropped_files(dropped).unwrap();
    viewer.tick().await.unwrap();

    assert_eq!(viewer.actors().len(), 2);
    assert!(viewer.actors()[0].geometry.starts_with("fox.gltf#"));
}

#[tokio::test]
async fn should_reject_drops_without_model() {
    let (mut viewer, statuses, errors) = observed(viewer(MemoryFiles::new()));
    let dropped = vec![DroppedFile {
        name: "texture.png".to_string(),
        contents: vec![1, 2, 3],
    }];

    let result = viewer.on_dropped_files(dropped.clone());
    assert!(matches!(result, Err(ViewerError::NoModelFile)));
    assert_eq!(*errors.borrow(), vec!["NoModelFile".to_string()]);

    assert!(matches!(
        viewer.handle().on_dropped_files(dropped),
        Err(ViewerError::NoModelFile)
    ));
    viewer.tick().await.unwrap();
    assert!(statuses.borrow().is_empty());
    assert!(viewer.actors().is_empty());
}

#[test]
fn should_keep_only_latest_pending_load() {
    let pending = PendingLoad::default();
    assert!(!pending.is_pending());

    pending.set("first.gltf");
    pending.clone().set("second.gltf");

    assert!(pending.is_pending());
    assert_eq!(pending.take().as_deref(), Some("second.gltf"));
    assert_eq!(pending.take(), None);
}
