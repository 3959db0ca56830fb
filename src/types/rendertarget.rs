//! Render target parameters and layout descriptions.

use std::sync::Arc;

use super::format::Format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// One color attachment of a render target.
#[derive(Debug)]
pub struct ColorAttachment<T> {
    pub attachment: Arc<T>,
    pub attachment_layer: u32,
    pub resolve_target: Option<Arc<T>>,
    pub resolve_target_layer: u32,
    pub load_op: LoadOp,
    pub clear_value: [f32; 4],
    pub store_op: StoreOp,
}

impl<T> Clone for ColorAttachment<T> {
    fn clone(&self) -> Self {
        Self {
            attachment: Arc::clone(&self.attachment),
            attachment_layer: self.attachment_layer,
            resolve_target: self.resolve_target.clone(),
            resolve_target_layer: self.resolve_target_layer,
            load_op: self.load_op,
            clear_value: self.clear_value,
            store_op: self.store_op,
        }
    }
}

impl<T> ColorAttachment<T> {
    pub fn new(attachment: Arc<T>) -> Self {
        Self {
            attachment,
            attachment_layer: 0,
            resolve_target: None,
            resolve_target_layer: 0,
            load_op: LoadOp::Clear,
            clear_value: [0.0; 4],
            store_op: StoreOp::Store,
        }
    }

    pub fn with_resolve_target(mut self, target: Arc<T>) -> Self {
        self.resolve_target = Some(target);
        self
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_clear_value(mut self, clear_value: [f32; 4]) -> Self {
        self.clear_value = clear_value;
        self
    }
}

/// Depth/stencil attachment of a render target.
#[derive(Debug)]
pub struct DepthStencilAttachment<T> {
    pub attachment: Arc<T>,
    pub attachment_layer: u32,
    pub resolve_target: Option<Arc<T>>,
    pub resolve_target_layer: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

impl<T> Clone for DepthStencilAttachment<T> {
    fn clone(&self) -> Self {
        Self {
            attachment: Arc::clone(&self.attachment),
            attachment_layer: self.attachment_layer,
            resolve_target: self.resolve_target.clone(),
            resolve_target_layer: self.resolve_target_layer,
            load_op: self.load_op,
            store_op: self.store_op,
        }
    }
}

impl<T> DepthStencilAttachment<T> {
    pub fn new(attachment: Arc<T>) -> Self {
        Self {
            attachment,
            attachment_layer: 0,
            resolve_target: None,
            resolve_target_layer: 0,
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
        }
    }
}

/// Parameters for creating a render target.
#[derive(Debug)]
pub struct RenderTargetParams<T> {
    pub width: u32,
    pub height: u32,
    pub colors: Vec<ColorAttachment<T>>,
    pub depth_stencil: Option<DepthStencilAttachment<T>>,
}

impl<T> Clone for RenderTargetParams<T> {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            colors: self.colors.clone(),
            depth_stencil: self.depth_stencil.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorAttachmentDesc {
    pub format: Format,
    pub resolve: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub format: Format,
    pub resolve: bool,
}

/// Attachment layout a pipeline is compatible with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetDesc {
    /// 0 means single-sampled.
    pub samples: u32,
    pub colors: Vec<ColorAttachmentDesc>,
    pub depth_stencil: Option<DepthStencilDesc>,
}
