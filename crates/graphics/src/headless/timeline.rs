use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crossbeam::channel::Receiver;

use crate::{
    format::{Format, SubresourceLayout},
    resource::ResourceState,
};

use super::{FenceState, RawResource, Shared};

#[derive(Clone)]
pub(super) enum Command {
    Barrier {
        resource: RawResource,
        before: ResourceState,
        after: ResourceState,
    },
    CopyToSubresource {
        dst: RawResource,
        dst_layout: SubresourceLayout,
        src: RawResource,
        src_layout: SubresourceLayout,
    },
    ClearColor {
        target: RawResource,
        format: Format,
        color: [f32; 4],
    },
    ClearDepth {
        target: RawResource,
        depth: f32,
    },
    Draw {
        target: RawResource,
        depth: Option<RawResource>,
        elements: u32,
        instances: u32,
    },
}

pub(super) enum Job {
    Execute {
        commands: Vec<Command>,
        executing: Arc<AtomicUsize>,
    },
    Signal {
        fence: Arc<FenceState>,
        value: u64,
    },
    Present {
        buffer: RawResource,
    },
}

/// Drains jobs in submission order until every sender is dropped.
pub(super) fn run(jobs: &Receiver<Job>, shared: &Shared) {
    for job in jobs {
        match job {
            Job::Execute {
                commands,
                executing,
            } => {
                // Work submitted after a removal is dropped, but fences keep
                // advancing so nothing waits forever.
                if !shared.is_removed() {
                    shared.statistics.lock().submissions += 1;
                    for command in &commands {
                        if let Err(reason) = execute(command, shared) {
                            shared.remove(reason);
                            break;
                        }
                    }
                }

                executing.fetch_sub(1, Ordering::AcqRel);
            }
            Job::Signal { fence, value } => fence.signal(value),
            Job::Present { buffer } => {
                let state = buffer.gpu_state();
                if state != ResourceState::Present {
                    shared.remove(format!("presented a back buffer in the {state:?} state"));
                }
            }
        }
    }

    log::debug!("headless timeline stopped");
}

fn execute(command: &Command, shared: &Shared) -> Result<(), String> {
    match command {
        Command::Barrier {
            resource,
            before,
            after,
        } => {
            let mut state = resource.0.state.lock();
            if *state != *before {
                return Err(format!(
                    "barrier expected {before:?} but the resource is in {:?}",
                    *state
                ));
            }
            *state = *after;
        }
        Command::CopyToSubresource {
            dst,
            dst_layout,
            src,
            src_layout,
        } => {
            expect_state(dst, ResourceState::CopyDest, "copy destination")?;

            if (dst_layout.width, dst_layout.height) != (src_layout.width, src_layout.height) {
                return Err(format!(
                    "copy footprint {}x{} does not match subresource {}x{}",
                    src_layout.width, src_layout.height, dst_layout.width, dst_layout.height
                ));
            }

            for row in 0..u64::from(src_layout.rows) {
                let from = src_layout.offset + row * u64::from(src_layout.row_pitch);
                let to = dst_layout.offset + row * u64::from(dst_layout.row_pitch);
                let bytes = src.read(from as usize, src_layout.row_size as usize);
                dst.0.write(to as usize, &bytes);
            }
        }
        Command::ClearColor {
            target,
            format,
            color,
        } => {
            expect_state(target, ResourceState::RenderTarget, "clear")?;
            fill(target, &encode_color(*format, *color));
        }
        Command::ClearDepth { target, depth } => {
            expect_state(target, ResourceState::DepthWrite, "depth clear")?;
            let texel = ((depth.clamp(0.0, 1.0) * 0x00FF_FFFF as f32) as u32).to_le_bytes();
            fill(target, &texel);
        }
        Command::Draw {
            target,
            depth,
            instances,
            ..
        } => {
            expect_state(target, ResourceState::RenderTarget, "draw")?;
            if let Some(depth) = depth {
                expect_state(depth, ResourceState::DepthWrite, "depth test")?;
            }

            let mut statistics = shared.statistics.lock();
            statistics.draw_calls += 1;
            statistics.instances += u64::from(*instances);
        }
    }

    Ok(())
}

fn expect_state(resource: &RawResource, expected: ResourceState, usage: &str) -> Result<(), String> {
    let state = resource.gpu_state();
    if state == expected {
        Ok(())
    } else {
        Err(format!("{usage} needs {expected:?} but the resource is in {state:?}"))
    }
}

/// Fills the first subresource of `target` with `texel`.
fn fill(target: &RawResource, texel: &[u8]) {
    let layout = crate::format::copyable_footprints(&target.0.desc).layouts[0];
    let row: Vec<u8> = texel
        .iter()
        .copied()
        .cycle()
        .take(layout.row_size as usize)
        .collect();

    for y in 0..u64::from(layout.rows) {
        target
            .0
            .write((layout.offset + y * u64::from(layout.row_pitch)) as usize, &row);
    }
}

fn encode_color(format: Format, color: [f32; 4]) -> [u8; 4] {
    let encode = |c: f32, is_alpha: bool| {
        let c = c.clamp(0.0, 1.0);
        let c = if format.is_srgb() && !is_alpha {
            if c <= 0.003_130_8 {
                c * 12.92
            } else {
                1.055 * c.powf(1.0 / 2.4) - 0.055
            }
        } else {
            c
        };
        (c * 255.0).round() as u8
    };

    [
        encode(color[0], false),
        encode(color[1], false),
        encode(color[2], false),
        encode(color[3], true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_clear_colors_are_gamma_encoded() {
        assert_eq!(encode_color(Format::Rgba8Unorm, [1.0, 0.0, 0.5, 1.0]), [255, 0, 128, 255]);
        assert_eq!(encode_color(Format::Rgba8UnormSrgb, [1.0, 0.0, 0.5, 1.0]), [255, 0, 188, 255]);
    }
}
