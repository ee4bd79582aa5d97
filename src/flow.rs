//! Render loop driver.
//!
//! The [`Viewer`] owns a [`RenderBackend`], a [`FileSource`] and the
//! [`Context`] and runs one long-lived loop over them. Hosts talk to a
//! running viewer through a [`ViewerHandle`]: request a (re)load, hand over
//! dropped files or tear it down.
//!
//! # Lifecycle
//!
//! Every iteration walks through the [`LoopState`]s in order:
//! 1. `EnsureDefaultAssets` compiles the shared shader and the fallback cube once
//! 2. `ConsumePendingLoad` takes a pending filename (if any) and loads it
//! 3. `BuildFrame` synthesizes the command list of the frame
//! 4. `Submit` hands the commands to the backend
//!
//! After every iteration the loop suspends until the next frame (an
//! animation frame in the browser). A failing iteration enters
//! `ErrorBackoff` and pauses for [`ViewerConfig::error_backoff`] before the
//! loop resumes. The loop only ends once the viewer was closed or the
//! backend reports it is gone.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use instant::{Duration, Instant};

use crate::{
    camera::OrbitCamera,
    context::{CUBE_ASSET, Context, LoadMode, SHADER_ASSET, ViewerConfig},
    data_structures::{
        actor::Actor,
        geometry::cube_geometry,
        scene_graph::{TraversalOptions, traverse},
        transform::Vec3,
    },
    error::ViewerError,
    render::{FrameInputs, RenderBackend, RenderCommand, build_commands, default_shader},
    resources::{CachedSource, DroppedFile, FileCache, FileSource, animation::AnimationClip, gltf::load_scene},
};

pub type StatusCallback = Box<dyn FnMut(Option<&str>)>;
pub type ErrorCallback = Box<dyn FnMut(&ViewerError)>;

/// Half the edge length of the fallback cube.
const CUBE_EXTENT: f32 = 0.5;

/// Installs the platform logger. Calling it twice is harmless.
pub fn init_logging() {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        let _ = console_log::init_with_level(log::Level::Info);
    }
}

/// Single slot mailbox for scene load requests.
///
/// Setting a filename overwrites whatever was not consumed yet; requests are
/// never queued.
#[derive(Clone, Debug, Default)]
pub struct PendingLoad {
    slot: Arc<Mutex<Option<String>>>,
}

impl PendingLoad {
    pub fn set(&self, filename: impl Into<String>) {
        let filename = filename.into();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(filename) {
            log::debug!("Discarding unconsumed load request for {}", previous);
        }
    }

    /// Takes the pending filename and clears the slot in one step.
    pub fn take(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Cheap, cloneable remote control of a [`Viewer`].
#[derive(Clone, Debug)]
pub struct ViewerHandle {
    pending: PendingLoad,
    files: FileCache,
    alive: Arc<AtomicBool>,
}

impl ViewerHandle {
    /// Requests `filename` to be loaded on the next iteration.
    pub fn reload(&self, filename: impl Into<String>) {
        self.pending.set(filename);
    }

    /// Caches all `files` and loads the first scene file among them.
    pub fn on_dropped_files(&self, files: Vec<DroppedFile>) -> Result<(), ViewerError> {
        match self.files.insert_dropped(files) {
            Some(model) => {
                self.pending.set(model);
                Ok(())
            }
            None => Err(ViewerError::NoModelFile),
        }
    }

    /// Ends the render loop after the current iteration.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    EnsureDefaultAssets,
    ConsumePendingLoad,
    BuildFrame,
    Submit,
    ErrorBackoff,
}

/// What a successful load cycle produced before it is committed.
struct LoadedScene<G> {
    actors: Vec<Actor>,
    clips: Vec<Arc<AnimationClip>>,
    geometries: Vec<(String, G)>,
}

pub struct Viewer<B: RenderBackend, L: FileSource> {
    backend: B,
    loader: CachedSource<L>,
    ctx: Context<B::Geometry, B::Shader>,
    camera: OrbitCamera,
    pending: PendingLoad,
    alive: Arc<AtomicBool>,
    state: LoopState,
    on_status: Option<StatusCallback>,
    on_error: Option<ErrorCallback>,
    started: Instant,
}

impl<B: RenderBackend, L: FileSource> Viewer<B, L> {
    pub fn new(backend: B, loader: L, config: ViewerConfig) -> Self {
        let camera = OrbitCamera::new(config.camera_position);
        Self {
            backend,
            loader: CachedSource::new(loader),
            ctx: Context::new(config),
            camera,
            pending: PendingLoad::default(),
            alive: Arc::new(AtomicBool::new(true)),
            state: LoopState::Idle,
            on_status: None,
            on_error: None,
            started: Instant::now(),
        }
    }

    /// Called with a message whenever a load phase begins and with `None`
    /// once loading is done.
    pub fn with_status_callback(mut self, callback: impl FnMut(Option<&str>) + 'static) -> Self {
        self.on_status = Some(Box::new(callback));
        self
    }

    /// Called with every failure of a load cycle.
    pub fn with_error_callback(mut self, callback: impl FnMut(&ViewerError) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn handle(&self) -> ViewerHandle {
        ViewerHandle {
            pending: self.pending.clone(),
            files: self.loader.cache.clone(),
            alive: self.alive.clone(),
        }
    }

    pub fn load(&self, filename: impl Into<String>) {
        self.pending.set(filename);
    }

    pub fn on_dropped_files(&mut self, files: Vec<DroppedFile>) -> Result<(), ViewerError> {
        let result = self.handle().on_dropped_files(files);
        if let Err(e) = &result {
            log::warn!("{}", e);
            self.report_error(e);
        }
        result
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &Context<B::Geometry, B::Shader> {
        &self.ctx
    }

    pub fn actors(&self) -> &[Actor] {
        &self.ctx.actors
    }

    pub fn clips(&self) -> &[Arc<AnimationClip>] {
        &self.ctx.clips
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.backend.is_alive()
    }

    fn report_status(&mut self, status: Option<&str>) {
        if let Some(callback) = self.on_status.as_mut() {
            callback(status);
        }
    }

    fn report_error(&mut self, error: &ViewerError) {
        if let Some(callback) = self.on_error.as_mut() {
            callback(error);
        }
    }

    /// Compiles the shared shader and the fallback cube unless present.
    pub async fn ensure_default_assets(&mut self) -> Result<(), ViewerError> {
        if !self.ctx.assets.has_shader(SHADER_ASSET) {
            let shader = self
                .backend
                .create_shader(&default_shader())
                .await
                .map_err(ViewerError::TransientFrameFailure)?;
            self.ctx.assets.insert_shader(SHADER_ASSET, shader);
        }
        if !self.ctx.assets.has_geometry(CUBE_ASSET) {
            let cube = self
                .backend
                .create_geometry(&cube_geometry(-CUBE_EXTENT, CUBE_EXTENT))
                .await
                .map_err(ViewerError::TransientFrameFailure)?;
            self.ctx.assets.insert_geometry(CUBE_ASSET, cube);
        }
        Ok(())
    }

    /// Loads the pending scene, if any. Returns whether a load cycle ran.
    ///
    /// Load failures never escape: they are reported through the error
    /// callback and the actor list is replaced by the fallback cube.
    pub async fn consume_pending_load(&mut self) -> bool {
        let Some(filename) = self.pending.take() else {
            return false;
        };
        log::info!("Loading {}", filename);
        self.report_status(Some(&format!("Loading {}...", filename)));

        match self.load_scene_file(&filename).await {
            Ok(scene) => {
                log::info!(
                    "Loaded {} with {} actors and {} clips",
                    filename,
                    scene.actors.len(),
                    scene.clips.len()
                );
                self.commit(scene);
                self.report_status(Some(&format!("Loaded {}", filename)));
            }
            Err(e) => {
                log::warn!("{}", e);
                self.report_error(&e);
                self.evict_scene_geometries();
                self.ctx.actors = vec![Actor::new(CUBE_ASSET, 0).with_translation(Vec3::new(0.0, 0.0, 0.0))];
                self.ctx.clips.clear();
            }
        }
        self.report_status(None);
        true
    }

    async fn load_scene_file(&mut self, filename: &str) -> Result<LoadedScene<B::Geometry>, ViewerError> {
        let on_status = &mut self.on_status;
        let doc = load_scene(filename, &self.loader, |path| {
            if let Some(callback) = on_status.as_mut() {
                callback(Some(&format!("Loading {}...", path)));
            }
        })
        .await
        .map_err(|e| ViewerError::load(filename, e))?;

        let options = TraversalOptions {
            first_ordinal: match self.ctx.config.load_mode {
                LoadMode::Replace => 0,
                LoadMode::Append => self.ctx.next_ordinal(),
            },
            max_joints: self.ctx.config.max_joints,
        };
        let mut geometry_names = Vec::new();
        let mut actors = Vec::new();
        let summary = traverse(
            &doc,
            options,
            |name, _| geometry_names.push(name.to_string()),
            |actor, _| actors.push(actor),
        );
        log::debug!("Traversed {}: {:?}", filename, summary);
        if actors.is_empty() {
            return Err(ViewerError::EmptyScene {
                filename: filename.to_string(),
            });
        }

        // reloads under the same name must pick up changed contents
        let mut geometries = Vec::new();
        for name in geometry_names {
            let Some(data) = doc.geometry(&name) else {
                continue;
            };
            let geometry = self
                .backend
                .create_geometry(data)
                .await
                .map_err(|e| ViewerError::load(filename, e))?;
            geometries.push((name, geometry));
        }

        Ok(LoadedScene {
            actors,
            clips: doc.animations,
            geometries,
        })
    }

    /// Drops every geometry except the fallback cube.
    fn evict_scene_geometries(&mut self) {
        self.ctx.assets.retain_geometries(|name| name == CUBE_ASSET);
    }

    fn commit(&mut self, scene: LoadedScene<B::Geometry>) {
        if self.ctx.config.load_mode == LoadMode::Replace {
            self.evict_scene_geometries();
        }
        for (name, geometry) in scene.geometries {
            self.ctx.assets.insert_geometry(name, geometry);
        }
        match self.ctx.config.load_mode {
            LoadMode::Replace => {
                self.ctx.actors = scene.actors;
                self.ctx.clips = scene.clips;
            }
            LoadMode::Append => {
                self.ctx.actors.extend(scene.actors);
                self.ctx.clips.extend(scene.clips);
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Command list of the current frame.
    pub fn build_frame(&self) -> Vec<RenderCommand<B::Geometry, B::Shader>> {
        let config = &self.ctx.config;
        let frame = FrameInputs {
            camera: &self.camera,
            screen: self.backend.screen_rect(),
            clear_colour: config.clear_colour,
            time: self.elapsed().as_secs_f64(),
            placement: config.placement,
            max_joints: config.max_joints,
        };
        build_commands(&self.ctx.actors, &self.ctx.assets, &frame)
    }

    /// Runs one loop iteration. Submission failures are swallowed, anything
    /// else is returned for the caller to back off.
    pub async fn tick(&mut self) -> Result<(), ViewerError> {
        self.state = LoopState::EnsureDefaultAssets;
        self.ensure_default_assets().await?;

        self.state = LoopState::ConsumePendingLoad;
        self.consume_pending_load().await;

        self.state = LoopState::BuildFrame;
        let commands = self.build_frame();

        self.state = LoopState::Submit;
        if let Err(e) = self.backend.submit(commands).await {
            log::debug!("{}", ViewerError::SubmissionFailure(e));
        }

        self.state = LoopState::Idle;
        Ok(())
    }

    /// Drives the viewer until it is closed or its backend is gone.
    pub async fn run(&mut self) {
        while self.is_alive() {
            if let Err(e) = self.tick().await {
                self.state = LoopState::ErrorBackoff;
                log::error!("{}", e);
                sleep(self.ctx.config.error_backoff).await;
                self.state = LoopState::Idle;
            }
            next_frame().await;
        }
        self.teardown();
    }

    /// Drops all compiled assets and actors. The viewer is unusable afterwards.
    pub fn teardown(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.ctx.assets.invalidate();
        self.ctx.actors.clear();
        self.ctx.clips.clear();
        self.state = LoopState::Idle;
        log::info!("Viewer torn down");
    }
}

async fn sleep(duration: Duration) {
    #[cfg(not(target_arch = "wasm32"))]
    tokio::time::sleep(duration).await;

    #[cfg(target_arch = "wasm32")]
    {
        let millis = duration.as_millis() as i32;
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window()
                .map(|window| {
                    window
                        .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis)
                        .is_ok()
                })
                .unwrap_or(false);
            if !scheduled {
                let _ = resolve.call0(&wasm_bindgen::JsValue::NULL);
            }
        });
        let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
    }
}

/// Suspends the loop until the next frame may start. Natively this hands
/// control back to the runtime, in the browser it waits for the next
/// animation frame so the page stays responsive.
async fn next_frame() {
    #[cfg(not(target_arch = "wasm32"))]
    tokio::task::yield_now().await;

    #[cfg(target_arch = "wasm32")]
    {
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let scheduled = web_sys::window()
                .map(|window| window.request_animation_frame(&resolve).is_ok())
                .unwrap_or(false);
            if !scheduled {
                let _ = resolve.call0(&wasm_bindgen::JsValue::NULL);
            }
        });
        let _ = wasm_bindgen_futures::JsFuture::from(promise).await;
    }
}
