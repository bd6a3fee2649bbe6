#[cfg(feature = "gbm")]
mod gbm_source;

use anyhow::{bail, Context, Result};
use clap::Parser;
use drm_fourcc::DrmFourcc;
use log::{debug, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gl_scanout::render::{EglDisplay, EglWindow, GlesBackend};
use gl_scanout::{
    Display, DisplayConfig, DisplayEvent, DisplaySurface, GlVersion, OutputId, Rect, Window,
};

type GlDisplay = Display<EglWindow, GlesBackend>;

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.parse().map_err(|_| format!("bad width '{}'", w))?;
    let h = h.parse().map_err(|_| format!("bad height '{}'", h))?;
    if w == 0 || h == 0 {
        return Err("size must be non-zero".into());
    }
    Ok((w, h))
}

fn parse_version(s: &str) -> Result<GlVersion, String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("expected MAJOR.MINOR, got '{}'", s))?;
    Ok(GlVersion::new(
        major.parse().map_err(|_| format!("bad major '{}'", major))?,
        minor.parse().map_err(|_| format!("bad minor '{}'", minor))?,
    ))
}

#[derive(Parser)]
#[command(name = "gl-scanout")]
#[command(about = "Headless display loop for the GL scanout core")]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window size in pixels (e.g. 1024x768)
    #[arg(long, value_parser = parse_size)]
    window: Option<(u32, u32)>,

    /// Guest surface size in pixels (e.g. 640x480)
    #[arg(long, value_parser = parse_size)]
    guest: Option<(u32, u32)>,

    /// Frames to present, 0 runs until Ctrl+C
    #[arg(short, long)]
    frames: Option<u64>,

    /// Device scale factor of the window
    #[arg(long)]
    scale_factor: Option<u32>,

    /// GL version for guest contexts (e.g. 3.0)
    #[arg(long, value_parser = parse_version)]
    gl_version: Option<GlVersion>,

    /// Scan out a GBM dmabuf for the first half of the run
    #[arg(long)]
    dmabuf: bool,

    /// DRM render node used for --dmabuf
    #[arg(long)]
    render_node: Option<PathBuf>,

    /// Write the last presented frame as a PPM image
    #[arg(long)]
    dump: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<(DisplayConfig, bool, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => DisplayConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => DisplayConfig::default(),
        };

        if let Some((w, h)) = self.window {
            config.window_width = w;
            config.window_height = h;
        }
        if let Some((w, h)) = self.guest {
            config.guest_width = w;
            config.guest_height = h;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(scale) = self.scale_factor {
            config.scale_factor = scale;
        }
        if let Some(version) = self.gl_version {
            config.gl_version = version;
        }
        if let Some(node) = self.render_node {
            config.render_node = node;
        }

        Ok((config, self.dmabuf, self.dump))
    }
}

/// Guest-side drawing: a bar sweeping down an otherwise grey screen.
fn paint_guest(surface: &DisplaySurface, frame: u64) {
    let (w, h) = (surface.width() as i32, surface.height() as i32);
    let bar = (h / 8).max(1);
    let y = (frame as i32 * 4) % h;
    surface.fill(Rect::new(0, 0, w, h), [0x40, 0x40, 0x40, 0xff]);
    surface.fill(Rect::new(0, y, w, bar), [0x20, 0x80, 0xe0, 0xff]);
}

/// Drain events until the queue settles. Returns presents completed.
fn pump_events(display: &mut GlDisplay) -> Result<u64> {
    let mut presented = 0;
    loop {
        let events = display.poll_events();
        if events.is_empty() {
            return Ok(presented);
        }
        for (id, event) in events {
            match event {
                DisplayEvent::RedrawRequested => {
                    let outcome = display.draw(id)?;
                    debug!("draw {}: {:?}", id, outcome);
                }
                DisplayEvent::BufferConsumed => presented += 1,
                DisplayEvent::ResizeWindow { width, height } => {
                    info!("Output {} wants a {}x{} window", id, width, height);
                }
            }
        }
    }
}

fn write_ppm(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write!(file, "P6\n{} {}\n255\n", width, height)?;

    // GL rows come bottom-up
    let row_len = (width * 4) as usize;
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in rgba.chunks_exact(row_len).rev() {
        for px in row.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
    }
    file.write_all(&rgb)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let (config, use_dmabuf, dump) = Cli::parse().into_config()?;
    if config.guest_width == 0 || config.guest_height == 0 {
        bail!("Guest surface size must be non-zero");
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    // Initialize EGL and GL on the window's own context
    let egl = Rc::new(EglDisplay::new()?);
    let window = EglWindow::new(
        egl.clone(),
        config.window_width,
        config.window_height,
        GlVersion::new(3, 0),
        config.scale_factor,
    )?;
    window.make_current()?;
    egl.load_gl();

    let mut display: GlDisplay = Display::new();
    let id: OutputId = display.register_output(window, GlesBackend::new(egl.clone()));
    display.resize(id, config.window_width, config.window_height)?;

    // Context the guest renderer would draw with
    let guest_ctx = display
        .create_context(id, config.gl_version)
        .context("Guest renderer context unavailable")?;
    display.make_current(id, guest_ctx)?;

    let surface = Rc::new(DisplaySurface::new(
        config.guest_width,
        config.guest_height,
        DrmFourcc::Xrgb8888,
    )?);
    display.switch(id, surface.clone())?;

    #[cfg(feature = "gbm")]
    let mut scanout = if use_dmabuf {
        Some(gbm_source::GbmScanout::allocate(
            &config.render_node,
            config.guest_width,
            config.guest_height,
        )?)
    } else {
        None
    };
    #[cfg(not(feature = "gbm"))]
    if use_dmabuf {
        warn!("Built without gbm support, ignoring --dmabuf");
    }

    println!(
        "Presenting {}x{} guest in {}x{} window. Press Ctrl+C to stop.",
        config.guest_width, config.guest_height, config.window_width, config.window_height
    );

    let interval = Duration::from_millis(config.refresh_interval_ms);
    let mut frame: u64 = 0;
    let mut presented: u64 = 0;

    while running.load(Ordering::SeqCst) && (config.frames == 0 || presented < config.frames) {
        #[allow(unused_mut)]
        let mut scanning_out = false;

        #[cfg(feature = "gbm")]
        {
            let half = config.frames / 2;
            if let Some(source) = scanout.as_mut() {
                if config.frames == 0 || presented < half {
                    display.scanout_dmabuf(id, &mut source.dmabuf)?;
                    source.render(display.output_mut(id)?, frame);
                    display.scanout_flush(id, source.region())?;
                    scanning_out = true;
                } else {
                    display.release_dmabuf(id, &mut source.dmabuf)?;
                    scanout = None;
                    info!("Dmabuf released, back to surface mode");
                }
            }
        }

        display.refresh(id, |output| {
            if scanning_out {
                return;
            }
            paint_guest(&surface, frame);
            let full = Rect::new(0, 0, surface.width() as i32, surface.height() as i32);
            if let Err(e) = output.update(full) {
                warn!("Surface update failed: {}", e);
            }
        })?;

        presented += pump_events(&mut display)?;
        frame += 1;
        std::thread::sleep(interval);
    }

    println!("\nPresented {} frames over {} ticks", presented, frame);

    if let Some(path) = dump {
        let output = display.output(id)?;
        output.window().make_current()?;
        let (w, h) = output.window().size();
        let pixels = output.gl().read_pixels(w, h);
        write_ppm(&path, w, h, &pixels)?;
        println!("Wrote {}", path.display());
    }

    display.destroy_context(id, guest_ctx)?;
    display.unregister_output(id)?;

    Ok(())
}
