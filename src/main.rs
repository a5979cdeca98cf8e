const FRAME_COUNT: usize = 120;
const RESIZE_AT_FRAME: usize = 60;

fn main() -> Result<(), frame_graph::FrameGraphError> {
    #[cfg(not(target_arch = "wasm32"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut app = demo_core::App::new(1280, 720)?;
    {
        let configs = app.renderer_mut().pass_configs_mut();
        configs.gaussian_blur.enabled = true;
        configs.histogram.enabled = true;
    }

    for frame in 0..FRAME_COUNT {
        if frame == RESIZE_AT_FRAME {
            app.renderer_mut().resize(1920, 1080);
        }
        if let Some(statistics) = app.update()?
            && frame % 30 == 0
        {
            log::info!(
                "Frame {}: {} scopes, {} transients in {} bytes ({} unaliased)",
                frame,
                statistics.scope_count,
                statistics.transient_count,
                statistics.heap_bytes,
                statistics.unaliased_bytes
            );
        }
    }

    let device = app.renderer().device().statistics();
    log::info!(
        "Rendered {} frames ({} cancelled), average frame time {:?}",
        app.rendered_frames(),
        app.cancelled_frames(),
        app.average_frame_time()
    );
    log::info!(
        "{} draws, {} dispatches, {} copies, {} aliasing barriers, {} command lists submitted",
        device.draws,
        device.dispatches,
        device.copies,
        device.aliasing_barriers,
        device.submitted_command_lists
    );
    Ok(())
}
