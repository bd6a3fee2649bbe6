use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use log::info;

use crate::backend::{ContextId, GlBackend, GlVersion, TextureId, Window};
use crate::dmabuf::DmaBuf;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::output::{DisplayEvent, DrawOutcome, Output};
use crate::surface::DisplaySurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u32);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// All registered outputs, addressed by handle.
///
/// Every output keeps its own geometry and GL resources; nothing is shared
/// between them.
pub struct Display<W: Window, G: GlBackend> {
    outputs: BTreeMap<OutputId, Output<W, G>>,
    next_id: u32,
}

impl<W: Window, G: GlBackend> Default for Display<W, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Window, G: GlBackend> Display<W, G> {
    pub fn new() -> Self {
        Self {
            outputs: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn register_output(&mut self, window: W, gl: G) -> OutputId {
        let id = OutputId(self.next_id);
        self.next_id += 1;
        self.outputs.insert(id, Output::new(window, gl));
        info!("Registered output {}", id);
        id
    }

    /// Tear down an output, releasing its framebuffer, textures, shader and
    /// contexts.
    pub fn unregister_output(&mut self, id: OutputId) -> Result<()> {
        let output = self.outputs.remove(&id).ok_or(Error::UnknownOutput(id))?;
        drop(output);
        info!("Unregistered output {}", id);
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        self.outputs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn output(&self, id: OutputId) -> Result<&Output<W, G>> {
        self.outputs.get(&id).ok_or(Error::UnknownOutput(id))
    }

    pub fn output_mut(&mut self, id: OutputId) -> Result<&mut Output<W, G>> {
        self.outputs.get_mut(&id).ok_or(Error::UnknownOutput(id))
    }

    /// Drain queued events from every output, in output order.
    pub fn poll_events(&mut self) -> Vec<(OutputId, DisplayEvent)> {
        self.outputs
            .iter_mut()
            .flat_map(|(id, output)| output.take_events().into_iter().map(move |ev| (*id, ev)))
            .collect()
    }

    pub fn resize(&mut self, id: OutputId, width: u32, height: u32) -> Result<()> {
        self.output_mut(id)?.resize(width, height);
        Ok(())
    }

    pub fn switch(&mut self, id: OutputId, surface: Rc<DisplaySurface>) -> Result<()> {
        self.output_mut(id)?.switch(surface)
    }

    pub fn update(&mut self, id: OutputId, rect: Rect) -> Result<()> {
        self.output_mut(id)?.update(rect)
    }

    pub fn refresh<F>(&mut self, id: OutputId, hw_update: F) -> Result<()>
    where
        F: FnOnce(&mut Output<W, G>),
    {
        self.output_mut(id)?.refresh(hw_update)
    }

    pub fn draw(&mut self, id: OutputId) -> Result<DrawOutcome> {
        self.output_mut(id)?.draw()
    }

    pub fn scanout_texture(
        &mut self,
        id: OutputId,
        texture: TextureId,
        y0_top: bool,
        backing_width: u32,
        backing_height: u32,
        region: Rect,
    ) -> Result<()> {
        self.output_mut(id)?
            .scanout_texture(texture, y0_top, backing_width, backing_height, region)
    }

    pub fn scanout_disable(&mut self, id: OutputId) -> Result<()> {
        self.output_mut(id)?.scanout_disable()
    }

    pub fn scanout_flush(&mut self, id: OutputId, region: Rect) -> Result<()> {
        self.output_mut(id)?.scanout_flush(region);
        Ok(())
    }

    pub fn scanout_dmabuf(&mut self, id: OutputId, dmabuf: &mut DmaBuf) -> Result<()> {
        self.output_mut(id)?.scanout_dmabuf(dmabuf)
    }

    pub fn release_dmabuf(&mut self, id: OutputId, dmabuf: &mut DmaBuf) -> Result<()> {
        self.output_mut(id)?.release_dmabuf(dmabuf)
    }

    pub fn create_context(&mut self, id: OutputId, version: GlVersion) -> Result<ContextId> {
        self.output_mut(id)?.create_context(version)
    }

    pub fn destroy_context(&mut self, id: OutputId, context: ContextId) -> Result<()> {
        self.output_mut(id)?.destroy_context(context)
    }

    pub fn make_current(&mut self, id: OutputId, context: ContextId) -> Result<()> {
        self.output_mut(id)?.make_context_current(context)
    }
}
