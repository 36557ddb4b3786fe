//! Linear decode for animation types 1 and 4.
//!
//! A mask byte per entry (bones, then UV bones, then float streams)
//! selects which sub-streams are present. Sub-stream byte lengths are
//! never stored: they are computed from per-entry key counts read
//! sequentially from the header table, and the float/vector payloads live
//! in a second, separately-addressed region. Both running offsets have to
//! be accumulated in exactly the declaration order or everything after
//! the first absent stream is misread.

use glam::Vec2;
use tracing::warn;

use crate::context::LoadContext;
use crate::Error;

use super::{Animation, DecodeOutcome, DecodeStatus, Sample};

/// Maximum plausible key count for one sub-stream.
const MAX_KEYS: usize = 4096;

/// Which sub-stream a mask bit selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Translation,
    Rotation,
    Scale,
    Visibility,
    Uv,
    Float,
}

impl Lane {
    /// Payload bytes per key in the data region.
    const fn payload_size(self) -> usize {
        match self {
            Lane::Translation | Lane::Rotation | Lane::Scale => 16,
            Lane::Visibility => 1,
            Lane::Uv => 8,
            Lane::Float => 4,
        }
    }
}

/// Lanes a bone entry can carry, in mask-bit order.
const BONE_LANES: [Lane; 4] = [Lane::Translation, Lane::Rotation, Lane::Scale, Lane::Visibility];

/// One located sub-stream: where its key table and payload start.
#[derive(Debug, Clone, Copy)]
struct SubStream {
    entry: usize,
    lane: Lane,
    num_keys: usize,
    key_table: usize,
    payload: usize,
}

/// Decode a type 1/4 animation.
pub(crate) fn decode(anim: &Animation<'_>) -> DecodeOutcome {
    let Some(anchor) = anim.anchor else {
        return DecodeOutcome::failed();
    };
    let Some(param_base) = usize::try_from(anim.param_ptr)
        .ok()
        .filter(|&p| p < anim.data.len())
    else {
        warn!(param_ptr = anim.param_ptr, "parameter region pointer invalid");
        return DecodeOutcome::failed();
    };

    let ctx = LoadContext::new(anim.data, anim.platform);
    let frames = anim.num_frames as usize;
    let bones = anim.num_bones as usize;
    let uvs = anim.num_uv_bones as usize;
    let floats = anim.num_float_streams as usize;
    let entries = bones + uvs + floats;

    // Mask block, one byte per entry.
    let mut cursor = anchor;
    let mut masks = Vec::with_capacity(entries);
    for _ in 0..entries {
        masks.push(ctx.read_u8(cursor));
        cursor += 1;
    }

    // Key-count table: one u16 per active lane, sequential.
    let mut subs = Vec::new();
    for (entry, &mask) in masks.iter().enumerate() {
        let lanes: &[Lane] = if entry < bones {
            &BONE_LANES
        } else if entry < bones + uvs {
            &[Lane::Uv]
        } else {
            &[Lane::Float]
        };
        for (bit, &lane) in lanes.iter().enumerate() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let raw = ctx.read_u16(cursor) as usize;
            cursor += 2;
            let num_keys = if raw > MAX_KEYS {
                warn!(raw, entry, "implausible key count, sub-stream dropped");
                0
            } else {
                raw
            };
            subs.push(SubStream {
                entry,
                lane,
                num_keys,
                key_table: 0,
                payload: 0,
            });
        }
    }

    // Key tables follow the counts; payloads pack into the data region.
    // Both offsets are computed, never stored.
    for sub in &mut subs {
        sub.key_table = cursor;
        cursor += sub.num_keys * 2;
    }
    let mut payload_cursor = param_base;
    for sub in &mut subs {
        sub.payload = payload_cursor;
        payload_cursor += sub.num_keys * sub.lane.payload_size();
    }
    if cursor > anim.data.len() || payload_cursor > anim.data.len() {
        let err = Error::TruncatedPayload {
            what: "animation sub-streams",
            offset: anchor,
            needed: cursor.max(payload_cursor) - anim.data.len(),
        };
        warn!(%err, "missing keys read as zero");
    }

    let mut samples = vec![Sample::BIND; frames * bones];
    let mut uv_samples = vec![Vec2::ZERO; frames * uvs];
    let mut float_samples = vec![0.0f32; frames * floats];

    for sub in &subs {
        if sub.num_keys == 0 {
            continue;
        }
        match sub.lane {
            Lane::Translation | Lane::Rotation | Lane::Scale => {
                let keys = read_keys(&ctx, sub, |at| ctx.read_vec4(at));
                for frame in 0..frames {
                    let value = hold(&keys, frame as u32);
                    let sample = &mut samples[frame * bones + sub.entry];
                    match sub.lane {
                        Lane::Translation => sample.translation = value,
                        Lane::Rotation => sample.rotation = value,
                        Lane::Scale => sample.scale = value,
                        _ => unreachable!(),
                    }
                }
            }
            Lane::Visibility => {
                let keys = read_keys(&ctx, sub, |at| ctx.read_u8(at) != 0);
                for frame in 0..frames {
                    samples[frame * bones + sub.entry].visible = hold(&keys, frame as u32);
                }
            }
            Lane::Uv => {
                let keys = read_keys(&ctx, sub, |at| {
                    Vec2::new(ctx.read_f32(at), ctx.read_f32(at + 4))
                });
                let slot = sub.entry - bones;
                for frame in 0..frames {
                    uv_samples[frame * uvs + slot] = hold(&keys, frame as u32);
                }
            }
            Lane::Float => {
                let keys = read_keys(&ctx, sub, |at| ctx.read_f32(at));
                let slot = sub.entry - bones - uvs;
                for frame in 0..frames {
                    float_samples[frame * floats + slot] = hold(&keys, frame as u32);
                }
            }
        }
    }

    DecodeOutcome {
        status: DecodeStatus::Decoded,
        num_frames: frames,
        num_bones: bones,
        samples,
        uv_samples,
        float_samples,
        diagnostics: None,
    }
}

/// Read a sub-stream's keys: frame indices from the key table, values
/// from the payload region.
fn read_keys<T, F: Fn(usize) -> T>(
    ctx: &LoadContext<'_>,
    sub: &SubStream,
    read_value: F,
) -> Vec<(u32, T)> {
    let size = sub.lane.payload_size();
    (0..sub.num_keys)
        .map(|k| {
            let frame = ctx.read_u16(sub.key_table + k * 2) as u32;
            let value = read_value(sub.payload + k * size);
            (frame, value)
        })
        .collect()
}

/// Step-hold sampling: the value of the last key at or before `frame`,
/// or the first key's value before any key.
fn hold<T: Copy>(keys: &[(u32, T)], frame: u32) -> T {
    let mut value = keys[0].1;
    for &(key_frame, key_value) in keys {
        if key_frame > frame {
            break;
        }
        value = key_value;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use leshy_common::Platform;

    /// Assemble an animation record followed by its two regions.
    fn build(
        ty: u32,
        frames: u16,
        bones: u16,
        uvs: u16,
        floats: u16,
        region_a: &[u8],
        region_b: &[u8],
    ) -> Vec<u8> {
        let mut buf = vec![0u8; Animation::WIRE_SIZE];
        let stream_ptr = buf.len() as i32;
        buf.extend_from_slice(region_a);
        let param_ptr = buf.len() as i32;
        buf.extend_from_slice(region_b);

        buf[0..4].copy_from_slice(&(-1i32).to_le_bytes());
        buf[4..8].copy_from_slice(&ty.to_le_bytes());
        buf[8..10].copy_from_slice(&frames.to_le_bytes());
        buf[10..12].copy_from_slice(&bones.to_le_bytes());
        buf[12..14].copy_from_slice(&uvs.to_le_bytes());
        buf[14..16].copy_from_slice(&floats.to_le_bytes());
        buf[16..20].copy_from_slice(&stream_ptr.to_le_bytes());
        buf[20..24].copy_from_slice(&(region_a.len() as u32).to_le_bytes());
        buf[24..28].copy_from_slice(&param_ptr.to_le_bytes());
        buf[28..32].copy_from_slice(&(region_b.len() as u32).to_le_bytes());
        buf
    }

    fn vec4_bytes(v: [f32; 4]) -> Vec<u8> {
        v.iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    #[test]
    fn test_translation_step_hold() {
        // One bone, translation lane only, keys at frames 0 and 2.
        let mut region_a = vec![0x01u8];
        region_a.extend_from_slice(&2u16.to_le_bytes());
        region_a.extend_from_slice(&0u16.to_le_bytes());
        region_a.extend_from_slice(&2u16.to_le_bytes());

        let mut region_b = vec4_bytes([0.0, 0.0, 0.0, 0.0]);
        region_b.extend(vec4_bytes([5.0, 6.0, 7.0, 0.0]));

        let buf = build(1, 4, 1, 0, 0, &region_a, &region_b);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let anim = Animation::load(&ctx, 0);
        let outcome = anim.decode();

        assert_eq!(outcome.status, DecodeStatus::Decoded);
        let at = |f: usize| outcome.sample(f, 0).unwrap().translation;
        assert_eq!(at(0), Vec4::ZERO);
        assert_eq!(at(1), Vec4::ZERO);
        assert_eq!(at(2), Vec4::new(5.0, 6.0, 7.0, 0.0));
        assert_eq!(at(3), Vec4::new(5.0, 6.0, 7.0, 0.0));
        // Untouched channels stay at bind pose.
        assert_eq!(outcome.sample(0, 0).unwrap().scale, Vec4::ONE);
    }

    #[test]
    fn test_two_region_accumulation() {
        // One bone with translation + scale: the scale payload must start
        // where the translation payload ends.
        let mut region_a = vec![0x05u8]; // bits 0 and 2
        region_a.extend_from_slice(&1u16.to_le_bytes()); // translation keys
        region_a.extend_from_slice(&1u16.to_le_bytes()); // scale keys
        region_a.extend_from_slice(&0u16.to_le_bytes()); // translation key frame
        region_a.extend_from_slice(&0u16.to_le_bytes()); // scale key frame

        let mut region_b = vec4_bytes([1.0, 2.0, 3.0, 0.0]);
        region_b.extend(vec4_bytes([2.0, 2.0, 2.0, 1.0]));

        let buf = build(4, 2, 1, 0, 0, &region_a, &region_b);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let anim = Animation::load(&ctx, 0);
        let outcome = anim.decode();

        let sample = outcome.sample(1, 0).unwrap();
        assert_eq!(sample.translation, Vec4::new(1.0, 2.0, 3.0, 0.0));
        assert_eq!(sample.scale, Vec4::new(2.0, 2.0, 2.0, 1.0));
        assert_eq!(sample.rotation, Vec4::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_visibility_and_float_streams() {
        // One bone with visibility, plus one float stream.
        let mut region_a = vec![0x08u8, 0x01];
        region_a.extend_from_slice(&1u16.to_le_bytes()); // visibility keys
        region_a.extend_from_slice(&2u16.to_le_bytes()); // float keys
        region_a.extend_from_slice(&0u16.to_le_bytes()); // visibility key frame
        region_a.extend_from_slice(&0u16.to_le_bytes()); // float key frames
        region_a.extend_from_slice(&1u16.to_le_bytes());

        let mut region_b = vec![0u8]; // visibility: hidden
        region_b.extend_from_slice(&0.5f32.to_le_bytes());
        region_b.extend_from_slice(&0.75f32.to_le_bytes());

        let buf = build(1, 2, 1, 0, 1, &region_a, &region_b);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let anim = Animation::load(&ctx, 0);
        let outcome = anim.decode();

        assert!(!outcome.sample(0, 0).unwrap().visible);
        assert!(!outcome.sample(1, 0).unwrap().visible);
        assert_eq!(outcome.float_samples, vec![0.5, 0.75]);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let mut region_a = vec![0x01u8];
        region_a.extend_from_slice(&1u16.to_le_bytes());
        region_a.extend_from_slice(&0u16.to_le_bytes());
        let region_b = vec4_bytes([1.0, 1.0, 1.0, 0.0]);

        let buf = build(1, 2, 1, 0, 0, &region_a, &region_b);
        let ctx = LoadContext::new(&buf, Platform::pc());
        let anim = Animation::load(&ctx, 0);

        let first = anim.decode().samples().to_vec();
        let second = anim.decode().samples().to_vec();
        assert_eq!(first, second);
    }
}
