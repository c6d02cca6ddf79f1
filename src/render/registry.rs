//! Generation-indexed ownership of GPU textures and buffers
//!
//! Every long-lived wgpu object the voxel pipeline allocates is inserted
//! here and referred to by a [`Handle`]. Slots are reused through a free
//! list; a stale handle (slot reused or released) is rejected instead of
//! silently resolving to a different object. Teardown destroys every live
//! object in slot order.

use std::marker::PhantomData;

use crate::core::error::Error;
use crate::core::types::Result;

/// Typed index into a [`Registry`]
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena with generation-checked handles
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free_slots: Vec<u32>,
    live: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free_slots: Vec::new(), live: 0 }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.live += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle { index, generation: slot.generation, _marker: PhantomData };
        }
        self.slots.push(Slot { generation: 0, value: Some(value) });
        Handle { index: (self.slots.len() - 1) as u32, generation: 0, _marker: PhantomData }
    }

    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
            .ok_or(Error::StaleHandle)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_ok()
    }

    /// Take the value out; the slot's generation advances
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .ok_or(Error::StaleHandle)?;
        let value = slot.value.take().ok_or(Error::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(handle.index);
        self.live -= 1;
        Ok(value)
    }

    /// Remove every live value in slot order
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(index as u32);
                out.push(value);
            }
        }
        self.live = 0;
        out
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

pub type TextureHandle = Handle<wgpu::Texture>;
pub type BufferHandle = Handle<wgpu::Buffer>;

/// Owner of every texture and buffer in a voxel context
#[derive(Default)]
pub struct ResourceRegistry {
    textures: Registry<wgpu::Texture>,
    buffers: Registry<wgpu::Buffer>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_texture(&mut self, device: &wgpu::Device, desc: &wgpu::TextureDescriptor) -> TextureHandle {
        log::debug!(
            "Allocating texture {:?} {}x{}x{} ({} mips, {:?})",
            desc.label.unwrap_or("unnamed"),
            desc.size.width,
            desc.size.height,
            desc.size.depth_or_array_layers,
            desc.mip_level_count,
            desc.format
        );
        self.textures.insert(device.create_texture(desc))
    }

    pub fn create_buffer(&mut self, device: &wgpu::Device, desc: &wgpu::BufferDescriptor) -> BufferHandle {
        log::debug!("Allocating buffer {:?} ({} bytes)", desc.label.unwrap_or("unnamed"), desc.size);
        self.buffers.insert(device.create_buffer(desc))
    }

    /// Buffer created with initial contents
    pub fn create_buffer_init(
        &mut self,
        device: &wgpu::Device,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> BufferHandle {
        use wgpu::util::DeviceExt;
        log::debug!("Allocating buffer {:?} ({} bytes, initialized)", label, contents.len());
        self.buffers.insert(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        }))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&wgpu::Texture> {
        self.textures.get(handle)
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&wgpu::Buffer> {
        self.buffers.get(handle)
    }

    /// Destroy one buffer now
    pub fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers.remove(handle)?.destroy();
        Ok(())
    }

    /// Destroy one texture now
    pub fn release_texture(&mut self, handle: TextureHandle) -> Result<()> {
        self.textures.remove(handle)?.destroy();
        Ok(())
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Destroy everything; buffers first, then textures, each in slot order
    pub fn destroy_all(&mut self) {
        let buffers = self.buffers.drain();
        let textures = self.textures.drain();
        log::info!("Destroying {} buffers and {} textures", buffers.len(), textures.len());
        for buffer in buffers {
            buffer.destroy();
        }
        for texture in textures {
            texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut reg = Registry::new();
        let a = reg.insert("a");
        let b = reg.insert("b");
        assert_eq!(*reg.get(a).unwrap(), "a");
        assert_eq!(reg.len(), 2);

        assert_eq!(reg.remove(a).unwrap(), "a");
        assert!(matches!(reg.get(a), Err(Error::StaleHandle)));
        assert!(matches!(reg.remove(a), Err(Error::StaleHandle)));
        assert_eq!(*reg.get(b).unwrap(), "b");
    }

    #[test]
    fn test_reused_slot_rejects_old_handle() {
        let mut reg = Registry::new();
        let a = reg.insert(1);
        reg.remove(a).unwrap();
        let c = reg.insert(3);
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(!reg.contains(a));
        assert_eq!(*reg.get(c).unwrap(), 3);
    }

    #[test]
    fn test_drain_is_slot_ordered() {
        let mut reg = Registry::new();
        let handles: Vec<_> = (0..5).map(|i| reg.insert(i)).collect();
        reg.remove(handles[1]).unwrap();
        assert_eq!(reg.drain(), vec![0, 2, 3, 4]);
        assert!(reg.is_empty());
        assert!(handles.iter().all(|h| !reg.contains(*h)));
    }
}
