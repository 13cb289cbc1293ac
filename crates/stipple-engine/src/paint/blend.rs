/// Blend mode of a draw, applied with premultiplied-alpha factors.
///
/// Blend mode is the graphics batcher's state-run key (and half of the
/// sprite batcher's), so every change of mode between draws costs a draw call.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    /// Source replaces destination.
    Copy,
    /// Source alpha punches holes into the destination.
    Erase,
}

impl BlendMode {
    pub fn to_wgpu(self) -> wgpu::BlendState {
        use wgpu::BlendFactor as F;

        let (src, dst) = match self {
            BlendMode::Normal => (F::One, F::OneMinusSrcAlpha),
            BlendMode::Add => (F::One, F::One),
            BlendMode::Multiply => (F::Dst, F::OneMinusSrcAlpha),
            BlendMode::Screen => (F::One, F::OneMinusSrc),
            BlendMode::Copy => (F::One, F::Zero),
            BlendMode::Erase => (F::Zero, F::OneMinusSrcAlpha),
        };
        let component = wgpu::BlendComponent {
            src_factor: src,
            dst_factor: dst,
            operation: wgpu::BlendOperation::Add,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    }
}
