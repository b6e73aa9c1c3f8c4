use std::sync::Arc;

use glam::{UVec2, Vec3};
use orrery_assets::{ChannelPolicy, LoadPool, MeshData, ModelLibrary};
use orrery_common::RenderConfig;
use orrery_ecs::{DirectionalLight, ModelComponent, PointLight, SpotLight, Transform};
use orrery_gpu::{CommandList, GpuBackend, HeadlessDevice, HeadlessSwapchain};
use orrery_physics::SimplePhysics;
use orrery_render::{
    ControlledCamera3D, FrameDriver, FrameOutcome, Key, RenderError, UiFrame, UiRenderer,
    ViewportBlit,
};
use orrery_scene::Scene;

struct Harness {
    device: Arc<HeadlessDevice>,
    driver: FrameDriver,
    scene: Scene,
    camera: ControlledCamera3D,
}

impl Harness {
    fn new() -> Self {
        let device = Arc::new(HeadlessDevice::new());
        let backend: Arc<dyn GpuBackend> = device.clone();
        let swapchain = HeadlessSwapchain::new(device.clone(), UVec2::new(800, 600), 3).unwrap();
        let driver = FrameDriver::new(
            backend.clone(),
            Box::new(swapchain),
            UVec2::new(800, 600),
            &RenderConfig::default(),
        )
        .unwrap();
        let scene = Scene::new("frames", backend, Box::new(SimplePhysics::default())).unwrap();
        Self {
            device,
            driver,
            scene,
            camera: ControlledCamera3D::default(),
        }
    }

    fn frame(&mut self, ui: &mut dyn UiRenderer) -> FrameOutcome {
        self.camera.update(1.0 / 60.0);
        self.driver
            .draw_frame(&mut self.scene, &self.camera.render_view(), ui)
            .unwrap()
    }

    fn populate(&mut self) {
        let backend: Arc<dyn GpuBackend> = self.device.clone();
        let library = ModelLibrary::new(backend, LoadPool::new(1, None), ChannelPolicy::default());
        let cube = library.insert_mesh("cube", MeshData::unit_cube()).unwrap();

        for (i, name) in ["crate a", "crate b"].into_iter().enumerate() {
            let e = self.scene.create_entity(name);
            self.scene
                .add_component(e, Transform::new(Vec3::X * i as f32 * 3.0, Vec3::ZERO, Vec3::ONE))
                .unwrap();
            self.scene
                .add_component(e, ModelComponent::loaded("cube", cube.clone()))
                .unwrap();
        }
        let sun = self.scene.create_entity("sun");
        self.scene
            .add_component(sun, Transform::new(Vec3::Y * 10.0, Vec3::new(-45.0, 0.0, 0.0), Vec3::ONE))
            .unwrap();
        self.scene.add_component(sun, DirectionalLight::default()).unwrap();
        let spot = self.scene.create_entity("spot");
        self.scene.add_component(spot, Transform::default()).unwrap();
        self.scene.add_component(spot, SpotLight::default()).unwrap();
        let bulb = self.scene.create_entity("bulb");
        self.scene.add_component(bulb, Transform::default()).unwrap();
        self.scene.add_component(bulb, PointLight::default()).unwrap();
    }
}

struct NoUi;

impl UiRenderer for NoUi {
    fn record(&mut self, _: &mut CommandList, _: &UiFrame) -> Result<(), RenderError> {
        Ok(())
    }
}

#[test]
fn passes_run_in_pipeline_order() {
    let mut h = Harness::new();
    h.populate();
    let backend: Arc<dyn GpuBackend> = h.device.clone();
    let mut ui = ViewportBlit::new(backend, orrery_gpu::Format::B8G8R8A8Srgb).unwrap();
    h.frame(&mut ui);

    let last = h.device.last_submission().unwrap();
    assert_eq!(last.command_lists.len(), 1);
    assert_eq!(
        last.command_lists[0].render_pass_names(),
        vec![
            "depth prepass",
            "gbuffer",
            "directional shadow",
            "spot shadow",
            "spot shadow blur horizontal",
            "spot shadow blur vertical",
            "ssao",
            "ssao blur",
            "composition",
            "forward overlay",
            "ui",
        ]
    );
    assert!(h.device.violations().is_empty(), "{:?}", h.device.violations());
}

#[test]
fn scene_update_is_submitted_before_the_frame() {
    let mut h = Harness::new();
    h.populate();
    h.frame(&mut NoUi);

    let submissions = h.device.submissions();
    let (frame, updates) = submissions.split_last().unwrap();
    assert_eq!(frame.command_lists[0].name(), "frame 0");
    let update_lists: Vec<&str> = updates
        .iter()
        .flat_map(|s| s.command_lists.iter().map(|l| l.name()))
        .collect();
    assert!(update_lists.contains(&"scene update"), "{update_lists:?}");
    assert!(update_lists.contains(&"light update"), "{update_lists:?}");
    assert!(updates.iter().all(|s| s.serial < frame.serial));
}

#[test]
fn unready_surface_skips_without_submitting() {
    let device = Arc::new(HeadlessDevice::new());
    let backend: Arc<dyn GpuBackend> = device.clone();
    let mut swapchain = HeadlessSwapchain::new(device.clone(), UVec2::new(64, 64), 2).unwrap();
    swapchain.set_unready(true);
    let mut driver = FrameDriver::new(
        backend.clone(),
        Box::new(swapchain),
        UVec2::new(64, 64),
        &RenderConfig::default(),
    )
    .unwrap();
    let mut scene = Scene::new("skip", backend, Box::new(SimplePhysics::default())).unwrap();
    let e = scene.create_entity("thing");
    scene.add_component(e, Transform::default()).unwrap();

    let before = device.stats();
    let camera = ControlledCamera3D::default();
    let outcome = driver
        .draw_frame(&mut scene, &camera.render_view(), &mut NoUi)
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped);
    assert_eq!(device.stats().submissions, before.submissions);
    assert_eq!(device.stats().presents, 0);
    assert_eq!(driver.frames_presented(), 0);
    // The skipped frame did not consume the pending edit.
    assert!(scene.get_component::<Transform>(e).unwrap().dirty);
}

#[test]
fn zero_sized_surface_skips() {
    let mut h = Harness::new();
    h.driver.resize_surface(UVec2::new(0, 0)).unwrap();
    assert_eq!(h.frame(&mut NoUi), FrameOutcome::Skipped);
    h.driver.resize_surface(UVec2::new(400, 300)).unwrap();
    assert!(matches!(h.frame(&mut NoUi), FrameOutcome::Presented { .. }));
}

#[test]
fn resize_between_frames_is_violation_free() {
    let mut h = Harness::new();
    h.populate();
    h.frame(&mut NoUi);
    let old_depth = h.driver.deferred().depth_image;

    h.driver.resize_viewport(UVec2::new(1024, 512)).unwrap();
    h.camera.camera.resize(1024, 512);
    assert!(h.device.is_image_alive(old_depth));
    assert_eq!(h.driver.ssao().target_size(), UVec2::new(512, 256));

    for _ in 0..3 {
        h.frame(&mut NoUi);
    }
    assert!(!h.device.is_image_alive(old_depth));
    assert!(h.device.violations().is_empty(), "{:?}", h.device.violations());
}

#[test]
fn steady_frames_upload_only_the_camera() {
    let mut h = Harness::new();
    h.populate();
    h.frame(&mut NoUi);

    let uploads = h.device.stats().buffer_uploads;
    if let FrameOutcome::Presented { update, .. } = h.frame(&mut NoUi) {
        assert_eq!(update.transform_uploads, 0);
        assert!(!update.lights_packed);
    } else {
        panic!("frame was skipped");
    }
    assert_eq!(h.device.stats().buffer_uploads, uploads + 1);
}

#[test]
fn flying_camera_changes_uploaded_view() {
    let mut h = Harness::new();
    h.frame(&mut NoUi);
    let first = h.device.buffer_contents(h.driver.camera_buffer().buffer()).unwrap();

    h.camera.on_key(Key::W, true);
    h.frame(&mut NoUi);
    let second = h.device.buffer_contents(h.driver.camera_buffer().buffer()).unwrap();
    assert_ne!(first, second);
}

#[test]
fn debug_lines_are_drawn_for_one_frame() {
    let mut h = Harness::new();
    h.frame(&mut NoUi);
    let grid = h.driver.overlay_mut().lines.vertex_count();
    assert!(grid > 0);

    h.driver
        .overlay_mut()
        .lines
        .push_line(Vec3::ZERO, Vec3::Y, [1.0, 0.0, 0.0, 1.0]);
    h.frame(&mut NoUi);
    assert_eq!(h.driver.overlay_mut().lines.vertex_count(), grid + 2);

    h.frame(&mut NoUi);
    assert_eq!(h.driver.overlay_mut().lines.vertex_count(), grid);
    assert!(h.device.violations().is_empty());
}

#[test]
fn teardown_releases_every_image() {
    let mut h = Harness::new();
    h.populate();
    for _ in 0..2 {
        h.frame(&mut NoUi);
    }
    let Harness {
        device,
        driver,
        scene,
        ..
    } = h;
    drop(driver);
    drop(scene);
    device.wait_idle();
    assert_eq!(device.live_images(), 0);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}
