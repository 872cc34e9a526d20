use std::any::Any;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::wgpu::surface::texture_format;
use crate::error::{RenderError, RenderResult};
use crate::gpu::texture::align_up;
use crate::gpu::{GpuResource, HeapKind, ResourceDesc, ResourceId, ResourceShape};
use crate::sync::lock;

/// Upper bound on blocking for a readback map.
const MAP_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) enum Allocation {
    Buffer {
        buffer: wgpu::Buffer,
        /// CPU copy of upload memory; writes are forwarded with `write_buffer`.
        shadow: Option<Mutex<Vec<u8>>>,
    },
    Texture(wgpu::Texture),
}

/// A wgpu buffer or texture behind the backend-neutral resource interface.
pub struct WgpuResource {
    id: ResourceId,
    desc: ResourceDesc,
    pub(crate) allocation: Allocation,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuResource {
    pub(crate) fn create(
        id: ResourceId,
        desc: ResourceDesc,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    ) -> RenderResult<Self> {
        let allocation = match &desc.shape {
            ResourceShape::Buffer { size } => {
                let usage = match desc.heap {
                    HeapKind::Upload => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    HeapKind::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    HeapKind::Local => {
                        wgpu::BufferUsages::VERTEX
                            | wgpu::BufferUsages::INDEX
                            | wgpu::BufferUsages::UNIFORM
                            | wgpu::BufferUsages::COPY_SRC
                            | wgpu::BufferUsages::COPY_DST
                    }
                };
                let padded = align_up(*size, wgpu::COPY_BUFFER_ALIGNMENT);
                let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&desc.label),
                    size: padded,
                    usage,
                    mapped_at_creation: false,
                });
                let shadow = (desc.heap == HeapKind::Upload).then(|| Mutex::new(vec![0; padded as usize]));
                Allocation::Buffer { buffer, shadow }
            }
            ResourceShape::Texture(info) => {
                if desc.heap != HeapKind::Local {
                    return Err(RenderError::usage(format!("{}: textures live in local memory", desc.label)));
                }
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&desc.label),
                    size: wgpu::Extent3d {
                        width: info.width,
                        height: info.height,
                        depth_or_array_layers: info.array_count,
                    },
                    mip_level_count: info.mip_count,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: texture_format(info.format),
                    usage: wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_DST
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                Allocation::Texture(texture)
            }
        };
        Ok(Self {
            id,
            desc,
            allocation,
            device,
            queue,
        })
    }

    pub(crate) fn downcast(resource: &dyn GpuResource) -> RenderResult<&WgpuResource> {
        resource
            .as_any()
            .downcast_ref::<WgpuResource>()
            .ok_or_else(|| RenderError::device(format!("{} was not created by the wgpu device", resource.id())))
    }

    pub(crate) fn buffer(&self) -> RenderResult<&wgpu::Buffer> {
        match &self.allocation {
            Allocation::Buffer { buffer, .. } => Ok(buffer),
            Allocation::Texture(_) => Err(RenderError::usage(format!("{}: not a buffer", self.desc.label))),
        }
    }

    pub(crate) fn texture(&self) -> RenderResult<&wgpu::Texture> {
        match &self.allocation {
            Allocation::Texture(texture) => Ok(texture),
            Allocation::Buffer { .. } => Err(RenderError::usage(format!("{}: not a texture", self.desc.label))),
        }
    }

    fn check_range(&self, offset: u64, len: usize) -> RenderResult<()> {
        let size = self.desc.buffer_size().unwrap_or(0);
        if offset.checked_add(len as u64).is_none_or(|end| end > size) {
            return Err(RenderError::usage(format!(
                "{} {}: access of {len} bytes at {offset} exceeds {size} bytes",
                self.id, self.desc.label
            )));
        }
        Ok(())
    }

    /// Maps a readback buffer, polling the device until the map completes.
    fn read_readback(&self, buffer: &wgpu::Buffer, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            drop(sender.send(res));
        });
        let deadline = Instant::now() + MAP_TIMEOUT;
        let mapped = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(remaining),
            };
            let timed_out = match self.device.poll(wait) {
                Ok(_) => remaining.is_zero(),
                Err(wgpu::PollError::Timeout) => true,
                Err(err) => {
                    return Err(RenderError::DeviceLost(format!(
                        "{}: poll while mapping failed: {err}",
                        self.desc.label
                    )));
                }
            };
            match receiver.try_recv() {
                Ok(res) => break res,
                Err(mpsc::TryRecvError::Empty) if timed_out => {
                    return Err(RenderError::device(format!(
                        "{}: readback map did not complete within {MAP_TIMEOUT:?}",
                        self.desc.label
                    )));
                }
                Err(mpsc::TryRecvError::Empty) => thread::yield_now(),
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(RenderError::DeviceLost(format!("{}: map callback dropped", self.desc.label)));
                }
            }
        };
        mapped.map_err(|err| RenderError::device(format!("{}: map failed: {err}", self.desc.label)))?;

        let start = offset as usize;
        {
            let view = slice.get_mapped_range();
            out.copy_from_slice(&view[start..start + out.len()]);
        }
        buffer.unmap();
        Ok(())
    }
}

impl fmt::Debug for WgpuResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuResource")
            .field("id", &self.id)
            .field("label", &self.desc.label)
            .field("heap", &self.desc.heap)
            .finish()
    }
}

impl GpuResource for WgpuResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    fn write_mapped(&self, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        let Allocation::Buffer {
            buffer,
            shadow: Some(shadow),
        } = &self.allocation
        else {
            return Err(RenderError::usage(format!(
                "{}: only upload memory is CPU-writable",
                self.desc.label
            )));
        };
        self.check_range(offset, bytes.len())?;
        let mut shadow = lock(shadow);
        let start = offset as usize;
        shadow[start..start + bytes.len()].copy_from_slice(bytes);

        // write_buffer needs 4-byte aligned ranges; widen from the shadow copy.
        let aligned_start = offset & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let aligned_end = align_up(offset + bytes.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        self.queue.write_buffer(
            buffer,
            aligned_start,
            &shadow[aligned_start as usize..aligned_end as usize],
        );
        Ok(())
    }

    fn read_mapped(&self, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        self.check_range(offset, out.len())?;
        match &self.allocation {
            Allocation::Buffer {
                shadow: Some(shadow), ..
            } => {
                let start = offset as usize;
                out.copy_from_slice(&lock(shadow)[start..start + out.len()]);
                Ok(())
            }
            Allocation::Buffer { buffer, shadow: None } if self.desc.heap == HeapKind::Readback => {
                self.read_readback(buffer, offset, out)
            }
            _ => Err(RenderError::usage(format!(
                "{}: GPU-local memory is not CPU-visible",
                self.desc.label
            ))),
        }
    }

    fn gpu_address(&self) -> Option<u64> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
