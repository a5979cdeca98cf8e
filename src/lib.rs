pub mod device;
pub mod pass_configs;
pub mod passes;
pub mod scene;

use std::sync::Arc;

use frame_graph::{
    BufferDescriptor, DrawFilterMask, DrawListContext, DrawListTagRegistry,
    DrawPacketPool, Format, FrameGraph, FrameGraphDescriptor, FrameSubmission, FrameStatistics,
    ImageDescriptor, ImageHandle, Result,
};
use parking_lot::RwLock;
use web_time::{Duration, Instant};

use device::HeadlessDevice;
use pass_configs::PassConfigs;
use passes::{
    BlitPass, BlitPassData, GaussianBlurHorizontalPass, GaussianBlurPassData,
    GaussianBlurVerticalPass, HISTOGRAM_READBACK, HistogramComputePass, INSTANCE_DATA,
    PostProcessPass, PostProcessPassData, SWAPCHAIN, ScenePass, ScenePassData, SharedDrawList,
    UploadPass, UploadPassData,
};
use scene::Scene;

const HISTOGRAM_BINS: u64 = 256;

pub struct Renderer {
    device: Arc<HeadlessDevice>,
    frame_graph: FrameGraph<PassConfigs>,
    pass_configs: PassConfigs,
    scene: Scene,
    draw_list: SharedDrawList,
    swapchain: ImageHandle,
    swapchain_size: (u32, u32),
    pending_resize: Option<(u32, u32)>,
}

impl Renderer {
    pub const SWAPCHAIN_FORMAT: Format = Format::Bgra8UnormSrgb;

    pub fn new(
        device: Arc<HeadlessDevice>,
        descriptor: FrameGraphDescriptor,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut frame_graph = FrameGraph::new(device.clone(), descriptor);

        let mut tags = DrawListTagRegistry::new();
        let forward_tag = tags.acquire_tag("forward")?;
        let fullscreen_tag = tags.acquire_tag("fullscreen")?;

        let packet_pool = Arc::new(DrawPacketPool::default());
        let scene = Scene::new(&device, forward_tag, packet_pool.clone(), 8);
        let draw_list: SharedDrawList = Arc::new(RwLock::new(DrawListContext::new(
            forward_tag.mask(),
            DrawFilterMask::MAIN_VIEW,
        )));

        let instance_data = BufferDescriptor::new(scene.instance_data_size());
        let instance_buffer = device.create_buffer("Instance Buffer", instance_data);
        let staging_buffer = device.create_buffer("Instance Staging Buffer", instance_data);
        frame_graph.import_buffer(INSTANCE_DATA, instance_buffer, instance_data)?;

        let histogram = BufferDescriptor::new(HISTOGRAM_BINS * 4);
        let histogram_buffer = device.create_buffer("Histogram Readback Buffer", histogram);
        frame_graph.import_buffer(HISTOGRAM_READBACK, histogram_buffer, histogram)?;

        let swapchain = Self::import_swapchain(&device, &mut frame_graph, width, height)?;

        let blur_data = GaussianBlurPassData {
            pipeline: device.create_pipeline_state("Gaussian Blur Pipeline"),
            shader_resource_group: device.create_shader_resource_group("Gaussian Blur Sampler"),
            fullscreen_tag,
            packet_pool: packet_pool.clone(),
        };

        frame_graph.register_producer(Box::new(UploadPass::new(UploadPassData {
            staging_buffer,
        })))?;
        frame_graph.register_producer(Box::new(ScenePass::new(ScenePassData {
            draw_list: draw_list.clone(),
            forward_tag,
        })))?;
        frame_graph.register_producer(Box::new(GaussianBlurHorizontalPass::new(
            blur_data.clone(),
        )))?;
        frame_graph.register_producer(Box::new(GaussianBlurVerticalPass::new(blur_data)))?;
        frame_graph.register_producer(Box::new(HistogramComputePass::default()))?;
        frame_graph.register_producer(Box::new(PostProcessPass::new(PostProcessPassData {
            pipeline: device.create_pipeline_state("Post Process Pipeline"),
            shader_resource_group: device.create_shader_resource_group("Post Process Sampler"),
            fullscreen_tag,
            packet_pool: packet_pool.clone(),
        })))?;
        frame_graph.register_producer(Box::new(BlitPass::new(
            BlitPassData {
                pipeline: device.create_pipeline_state("Blit Pipeline"),
                shader_resource_group: device.create_shader_resource_group("Blit Sampler"),
                fullscreen_tag,
                packet_pool,
            },
            "blit_pass".to_string(),
        )))?;

        Ok(Self {
            device,
            frame_graph,
            pass_configs: PassConfigs::default(),
            scene,
            draw_list,
            swapchain,
            swapchain_size: (width, height),
            pending_resize: None,
        })
    }

    fn import_swapchain(
        device: &HeadlessDevice,
        frame_graph: &mut FrameGraph<PassConfigs>,
        width: u32,
        height: u32,
    ) -> Result<ImageHandle> {
        let descriptor = ImageDescriptor::new_2d(Self::SWAPCHAIN_FORMAT, width, height);
        let swapchain = device.create_image("Swapchain", descriptor);
        frame_graph.import_image(SWAPCHAIN, swapchain, descriptor)?;
        Ok(swapchain)
    }

    pub fn device(&self) -> &Arc<HeadlessDevice> {
        &self.device
    }

    pub fn frame_graph(&self) -> &FrameGraph<PassConfigs> {
        &self.frame_graph
    }

    pub fn pass_configs_mut(&mut self) -> &mut PassConfigs {
        &mut self.pass_configs
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn swapchain_size(&self) -> (u32, u32) {
        self.swapchain_size
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain_size.0 as f32 / self.swapchain_size.1.max(1) as f32
    }

    /// Takes effect at the next frame. A frame that is already compiled
    /// when the resize arrives is cancelled instead of executed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width.max(1), height.max(1)));
    }

    fn apply_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.release_image(self.swapchain);
        self.swapchain = Self::import_swapchain(&self.device, &mut self.frame_graph, width, height)?;
        self.swapchain_size = (width, height);
        log::info!("Swapchain resized to {}x{}", width, height);
        Ok(())
    }

    /// Renders one frame. Returns `None` when the frame was cancelled by a
    /// resize.
    pub fn render_frame(&mut self, delta_time: Duration) -> Result<Option<FrameSubmission>> {
        let aspect_ratio = self.aspect_ratio();
        self.scene.update(aspect_ratio, delta_time.as_secs_f32());
        self.scene.collect(&mut self.draw_list.write());

        self.frame_graph.begin_frame(&self.pass_configs)?;
        self.frame_graph.compile(&self.pass_configs)?;

        if let Some((width, height)) = self.pending_resize.take() {
            log::debug!(
                "Cancelling frame {} for a swapchain resize",
                self.frame_graph.frame_index()
            );
            self.frame_graph.cancel_frame()?;
            self.apply_resize(width, height)?;
            return Ok(None);
        }

        let submission = self.frame_graph.execute(&self.pass_configs)?;
        self.device.submit(&submission);
        Ok(Some(submission))
    }
}

/// Drives the renderer for a fixed number of frames and keeps timing.
pub struct App {
    renderer: Renderer,
    last_render_time: Option<Instant>,
    rendered_frames: usize,
    cancelled_frames: usize,
    total_frame_time: Duration,
}

impl App {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let descriptor = FrameGraphDescriptor::default()
            .with_culling(true)
            .with_items_per_command_list(16);
        let renderer = Renderer::new(HeadlessDevice::new(), descriptor, width, height)?;

        Ok(Self {
            renderer,
            last_render_time: None,
            rendered_frames: 0,
            cancelled_frames: 0,
            total_frame_time: Duration::ZERO,
        })
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn rendered_frames(&self) -> usize {
        self.rendered_frames
    }

    pub fn cancelled_frames(&self) -> usize {
        self.cancelled_frames
    }

    pub fn average_frame_time(&self) -> Duration {
        match self.rendered_frames {
            0 => Duration::ZERO,
            frames => self.total_frame_time / frames as u32,
        }
    }

    pub fn update(&mut self) -> Result<Option<FrameStatistics>> {
        let now = Instant::now();
        let delta_time = self
            .last_render_time
            .map_or(Duration::ZERO, |last| now - last);
        self.last_render_time = Some(now);

        let Some(submission) = self.renderer.render_frame(delta_time)? else {
            self.cancelled_frames += 1;
            return Ok(None);
        };

        self.rendered_frames += 1;
        self.total_frame_time += now.elapsed();

        let statistics = self.renderer.frame_graph().statistics().clone();
        log::debug!(
            "Frame {}: {} command lists, {} bytes of transient heap, {} aliasing barriers",
            submission.frame_index,
            submission.command_list_count(),
            statistics.heap_bytes,
            statistics.aliasing_barrier_count
        );
        Ok(Some(statistics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_graph::QueueClass;

    #[test]
    fn frames_run_through_every_queue() {
        let mut app = App::new(320, 180).unwrap();
        app.renderer_mut().pass_configs_mut().histogram.enabled = true;
        app.renderer_mut().pass_configs_mut().gaussian_blur.enabled = true;

        for _ in 0..3 {
            let statistics = app.update().unwrap().unwrap();
            assert_eq!(statistics.scope_count, 7);
            assert_eq!(statistics.culled_scope_count, 0);
        }

        let frame_graph = app.renderer().frame_graph();
        let names = |queue| {
            frame_graph
                .queue_order(queue)
                .into_iter()
                .map(|scope| scope.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(QueueClass::Copy), vec!["upload_pass"]);
        assert_eq!(names(QueueClass::Compute), vec!["histogram_compute_pass"]);
        assert_eq!(
            names(QueueClass::Graphics),
            vec![
                "scene_pass",
                "gaussian_blur_horizontal_pass",
                "gaussian_blur_vertical_pass",
                "post_process_pass",
                "blit_pass",
            ]
        );

        let scene = frame_graph
            .scope(&frame_graph::ScopeId::new("scene_pass"))
            .unwrap();
        assert_eq!(scene.estimated_item_count(), 64);
        assert_eq!(scene.item_ranges(16).len(), 4);

        let statistics = app.renderer().device().statistics();
        assert_eq!(statistics.draws, 3 * (64 + 4));
        assert_eq!(statistics.copies, 3);
        assert_eq!(statistics.discarded_command_lists, 0);
        assert_eq!(app.rendered_frames(), 3);
    }

    #[test]
    fn transient_targets_share_heap_memory() {
        let mut app = App::new(256, 256).unwrap();
        let statistics = app.update().unwrap().unwrap();

        assert!(statistics.heap_bytes < statistics.unaliased_bytes);
        assert!(statistics.aliasing_barrier_count > 0);
        assert_eq!(statistics.imported_count, 3);
    }

    #[test]
    fn resize_cancels_the_compiled_frame() {
        let mut app = App::new(320, 180).unwrap();
        app.update().unwrap().unwrap();

        app.renderer_mut().resize(640, 360);
        assert!(app.update().unwrap().is_none());
        assert_eq!(app.cancelled_frames(), 1);
        assert_eq!(app.renderer().swapchain_size(), (640, 360));
        assert_eq!(app.renderer().device().live_frame_objects(), (0, 0));

        app.update().unwrap().unwrap();
        assert_ne!(app.renderer().device().live_frame_objects(), (0, 0));
        let frame_graph = app.renderer().frame_graph();
        let scene_color = frame_graph
            .frame_attachment(frame_graph::ResourceId::from_name(passes::SCENE_COLOR))
            .unwrap();
        assert!(matches!(
            scene_color.descriptor(),
            frame_graph::ResourceDescriptor::Image(image) if image.width == 640 && image.height == 360
        ));
    }

    #[test]
    fn disabled_blur_copies_through() {
        let mut app = App::new(64, 64).unwrap();
        app.update().unwrap().unwrap();

        let statistics = app.renderer().device().statistics();
        assert_eq!(statistics.copies, 3);
        assert_eq!(statistics.draws, 64 + 2);
        assert_eq!(statistics.dispatches, 0);
    }
}
