//! Heuristic decode for the Type-6 animation family (types 6-10).
//!
//! The wire format: a packed array of 4-bit per-bone channel masks (bit 0
//! translation, bit 1 rotation, bit 2 scale, bit 3 visibility), followed
//! per active channel by a `{num_frames, num_keys}` stream header, a
//! key-time table, and a separately-addressed parameter block of
//! `{min, delta}` floats plus quantized i16 sample sets.
//!
//! None of the anchoring is reliable. The byte offset of the mask block,
//! the byte order of the stream headers, and the byte order and base of
//! the parameter block differ across shipped files and cannot be derived
//! from the header alone. The decoder therefore searches a bounded window
//! around the nominal anchor for plausible mask blocks, trial-decodes
//! every candidate under each parameter interpretation, scores the
//! results, and keeps the best-scoring decode. The scoring constants are
//! empirically tuned against observed data; they are the contract this
//! module maintains, not derived truths.

use glam::Vec4;
use tracing::{debug, warn};

use super::{Animation, DecodeDiagnostics, DecodeOutcome, DecodeStatus, Sample};

/// Half-width of the full mask-block search window around the anchor.
pub const SEARCH_WINDOW: usize = 0x40000;

/// Half-width of the fast first-pass window. Most files keep the mask
/// block within a few KiB of the declared anchor.
pub const NARROW_WINDOW: usize = 0x1000;

/// Cap on mask-block candidates per decode; the closest offsets to the
/// anchor win slots.
const MAX_CANDIDATES: usize = 64;

/// Maximum plausible key count per channel.
const MAX_KEYS: usize = 4096;

/// Maximum plausible per-channel frame count.
const MAX_CHANNEL_FRAMES: u32 = 0x4000;

/// A trial scoring at or below this floor is rejected outright.
const REJECT_FLOOR: f64 = -5000.0;

const PENALTY_NON_FINITE: f64 = -1000.0;
const PENALTY_HUGE_TRANSLATION: f64 = -50.0;
const PENALTY_DEGENERATE_SCALE: f64 = -25.0;
const PENALTY_BAD_ROTATION: f64 = -15.0;
const BONUS_SANE_TRANSLATION: f64 = 10.0;
const BONUS_SANE_SCALE: f64 = 10.0;
const BONUS_UNIT_ROTATION: f64 = 15.0;
/// Weight of the mask-density tie-break; small enough to never override
/// a real score difference.
const MASK_DENSITY_WEIGHT: f64 = 1.0e-3;

/// One bone channel selected by a mask bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Translation,
    Rotation,
    Scale,
    Visibility,
}

impl ChannelKind {
    const ALL: [ChannelKind; 4] = [
        ChannelKind::Translation,
        ChannelKind::Rotation,
        ChannelKind::Scale,
        ChannelKind::Visibility,
    ];

    const fn bit(self) -> u8 {
        match self {
            ChannelKind::Translation => 0x1,
            ChannelKind::Rotation => 0x2,
            ChannelKind::Scale => 0x4,
            ChannelKind::Visibility => 0x8,
        }
    }

    /// Quantized components per sample set.
    const fn components(self) -> usize {
        match self {
            ChannelKind::Translation | ChannelKind::Scale => 3,
            ChannelKind::Rotation => 4,
            ChannelKind::Visibility => 1,
        }
    }
}

/// One parameter interpretation under trial.
#[derive(Debug, Clone, Copy)]
struct TrialConfig {
    mask_offset: usize,
    param_absolute: bool,
    stream_big_endian: bool,
    param_big_endian: bool,
}

/// A fully parsed channel: key times plus dequantized sample sets.
#[derive(Debug, Clone)]
struct Channel {
    bone: usize,
    kind: ChannelKind,
    key_times: Vec<u32>,
    /// `num_keys + 3` sets so every key interval has four consecutive
    /// sets for the cubic; components padded into `[f32; 4]`.
    sets: Vec<[f32; 4]>,
}

/// Decode a Type-6 family animation.
///
/// Scans the narrow window first and falls back to the full window only
/// when no plausible decode was found there.
pub(crate) fn decode(anim: &Animation<'_>) -> DecodeOutcome {
    let narrow = decode_with_window(anim, NARROW_WINDOW);
    if narrow.status != DecodeStatus::Failed {
        return narrow;
    }
    decode_with_window(anim, SEARCH_WINDOW)
}

/// Decode with an explicit search half-width.
pub(crate) fn decode_with_window(anim: &Animation<'_>, window: usize) -> DecodeOutcome {
    if anim.num_bones == 0 || anim.num_frames == 0 {
        return DecodeOutcome::pose_only();
    }

    let candidates = find_candidates(anim, window);
    if candidates.is_empty() {
        warn!(
            anchor = ?anim.anchor,
            "no plausible mask block in search window, animation unresolvable"
        );
        return DecodeOutcome::failed();
    }

    let mut best: Option<(f64, TrialConfig, Vec<Channel>, f32)> = None;
    let mut trials = 0usize;
    for &mask_offset in &candidates {
        let density = mask_density(anim, mask_offset);
        for param_absolute in [true, false] {
            for stream_big_endian in [false, true] {
                for param_big_endian in [false, true] {
                    let config = TrialConfig {
                        mask_offset,
                        param_absolute,
                        stream_big_endian,
                        param_big_endian,
                    };
                    let Some(channels) = parse_trial(anim, &config) else {
                        continue;
                    };
                    trials += 1;
                    let score = score_trial(anim, &channels, density);
                    if best.as_ref().map_or(true, |(b, ..)| score > *b) {
                        best = Some((score, config, channels, density));
                    }
                }
            }
        }
    }

    let Some((score, config, channels, density)) = best else {
        warn!(
            candidates = candidates.len(),
            "every trial decode failed to parse, animation unresolvable"
        );
        return DecodeOutcome::failed();
    };
    if score <= REJECT_FLOOR {
        warn!(score, "best trial decode below reject floor, animation unresolvable");
        return DecodeOutcome::failed();
    }

    debug!(
        score,
        offset = config.mask_offset,
        trials,
        "keyframe animation resolved"
    );

    let frames = anim.num_frames as usize;
    let bones = anim.num_bones as usize;
    let mut samples = vec![Sample::BIND; frames * bones];
    for channel in &channels {
        for frame in 0..frames {
            let v = sample_channel(channel, frame as u32, anim.num_frames as u32);
            let sample = &mut samples[frame * bones + channel.bone];
            match channel.kind {
                ChannelKind::Translation => {
                    sample.translation = Vec4::new(v[0], v[1], v[2], 0.0);
                }
                ChannelKind::Rotation => {
                    let q = Vec4::new(v[0], v[1], v[2], v[3]);
                    let norm = q.length();
                    // Near-zero quaternions stay as-is rather than
                    // propagating NaN through a division.
                    sample.rotation = if norm > 1.0e-6 { q / norm } else { q };
                }
                ChannelKind::Scale => {
                    sample.scale = Vec4::new(v[0], v[1], v[2], 1.0);
                }
                ChannelKind::Visibility => {
                    sample.visible = v[0] > 0.5;
                }
            }
        }
    }

    DecodeOutcome {
        status: DecodeStatus::Decoded,
        num_frames: frames,
        num_bones: bones,
        samples,
        uv_samples: Vec::new(),
        float_samples: Vec::new(),
        diagnostics: Some(DecodeDiagnostics {
            candidates: candidates.len(),
            trials,
            winning_score: score,
            chosen_offset: config.mask_offset,
            stream_big_endian: config.stream_big_endian,
            param_big_endian: config.param_big_endian,
            param_absolute: config.param_absolute,
            mask_density: density,
        }),
    }
}

/// Bytes occupied by the packed mask block.
fn mask_len(num_bones: usize) -> usize {
    (num_bones + 1) / 2
}

/// The 4-bit mask for one bone.
fn bone_mask(data: &[u8], mask_offset: usize, bone: usize) -> u8 {
    let byte = data.get(mask_offset + bone / 2).copied().unwrap_or(0);
    (byte >> ((bone % 2) * 4)) & 0xF
}

/// Fraction of bones with a non-zero channel mask at `mask_offset`.
fn mask_density(anim: &Animation<'_>, mask_offset: usize) -> f32 {
    let bones = anim.num_bones as usize;
    let nonzero = (0..bones)
        .filter(|&b| bone_mask(anim.data, mask_offset, b) != 0)
        .count();
    nonzero as f32 / bones as f32
}

/// Whether the bytes at `offset` look like a mask block: at least half
/// the bones carry a non-zero mask.
fn plausible_mask(anim: &Animation<'_>, offset: usize) -> bool {
    let bones = anim.num_bones as usize;
    if offset + mask_len(bones) > anim.data.len() {
        return false;
    }
    let nonzero = (0..bones)
        .filter(|&b| bone_mask(anim.data, offset, b) != 0)
        .count();
    nonzero * 2 >= bones
}

/// Enumerate plausible mask offsets outward from the anchor.
///
/// The nominal anchor is tried first, then offsets fan out by distance,
/// so the candidate list (and everything downstream of it) is fully
/// deterministic and biased toward the declared position.
fn find_candidates(anim: &Animation<'_>, window: usize) -> Vec<usize> {
    let Some(anchor) = anim.anchor else {
        return Vec::new();
    };

    let mut out = Vec::new();
    if plausible_mask(anim, anchor) {
        out.push(anchor);
    }
    for delta in 1..=window {
        if out.len() >= MAX_CANDIDATES {
            break;
        }
        let forward = anchor + delta;
        if forward < anim.data.len() && plausible_mask(anim, forward) {
            out.push(forward);
        }
        if out.len() >= MAX_CANDIDATES {
            break;
        }
        if let Some(backward) = anchor.checked_sub(delta) {
            if plausible_mask(anim, backward) {
                out.push(backward);
            }
        }
    }
    out
}

fn read_u16_at(data: &[u8], offset: usize, big_endian: bool) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    let raw = [bytes[0], bytes[1]];
    Some(if big_endian {
        u16::from_be_bytes(raw)
    } else {
        u16::from_le_bytes(raw)
    })
}

fn read_f32_at(data: &[u8], offset: usize, big_endian: bool) -> Option<f32> {
    let bytes = data.get(offset..offset + 4)?;
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    Some(f32::from_bits(if big_endian {
        u32::from_be_bytes(raw)
    } else {
        u32::from_le_bytes(raw)
    }))
}

fn read_i16_at(data: &[u8], offset: usize, big_endian: bool) -> Option<i16> {
    read_u16_at(data, offset, big_endian).map(|v| v as i16)
}

/// Attempt a full parse under one configuration. Any out-of-bounds read
/// or implausible field rejects the trial.
fn parse_trial(anim: &Animation<'_>, config: &TrialConfig) -> Option<Vec<Channel>> {
    let data = anim.data;
    let bones = anim.num_bones as usize;
    // Types 8 and up use the byte-wide stream header sub-variant.
    let small_header = anim.ty >= 8;

    let mut cursor = config.mask_offset + mask_len(bones);
    let mut param = if config.param_absolute {
        usize::try_from(anim.param_ptr).ok()?
    } else {
        config.mask_offset.checked_add_signed(anim.param_ptr as isize)?
    };
    if param >= data.len() {
        return None;
    }

    let mut channels = Vec::new();
    for bone in 0..bones {
        let mask = bone_mask(data, config.mask_offset, bone);
        for kind in ChannelKind::ALL {
            if mask & kind.bit() == 0 {
                continue;
            }

            let (channel_frames, num_keys) = if small_header {
                let frames = *data.get(cursor)? as u32;
                let keys = *data.get(cursor + 1)? as usize;
                cursor += 2;
                (frames, keys)
            } else {
                let frames = read_u16_at(data, cursor, config.stream_big_endian)? as u32;
                let keys = read_u16_at(data, cursor + 2, config.stream_big_endian)? as usize;
                cursor += 4;
                (frames, keys)
            };
            if num_keys > MAX_KEYS || channel_frames > MAX_CHANNEL_FRAMES {
                return None;
            }

            let mut key_times = Vec::with_capacity(num_keys);
            for _ in 0..num_keys {
                let time = if small_header {
                    let t = *data.get(cursor)? as u32;
                    cursor += 1;
                    t
                } else {
                    let t = read_u16_at(data, cursor, config.stream_big_endian)? as u32;
                    cursor += 2;
                    t
                };
                key_times.push(time);
            }

            let min = read_f32_at(data, param, config.param_big_endian)?;
            let delta = read_f32_at(data, param + 4, config.param_big_endian)?;
            param += 8;

            let comps = kind.components();
            let num_sets = num_keys + 3;
            let mut sets = Vec::with_capacity(num_sets);
            for _ in 0..num_sets {
                let mut set = [0.0f32; 4];
                for slot in set.iter_mut().take(comps) {
                    let raw = read_i16_at(data, param, config.param_big_endian)?;
                    param += 2;
                    *slot = min + raw as f32 / 32767.0 * delta;
                }
                sets.push(set);
            }

            channels.push(Channel {
                bone,
                kind,
                key_times,
                sets,
            });
        }
    }

    Some(channels)
}

/// The cubic blend polynomial the original engine evaluates per
/// component over four consecutive sample sets.
fn cubic(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    (((p3 - p2) - p1 - p0) * t * t * t) + p2 * t * t + p1 * t + p0
}

/// Evaluate a channel at a frame.
fn sample_channel(channel: &Channel, frame: u32, num_frames: u32) -> [f32; 4] {
    if channel.sets.is_empty() {
        return [0.0; 4];
    }

    // The key whose interval contains the frame: last key time <= frame.
    let mut key = 0usize;
    for (i, &time) in channel.key_times.iter().enumerate() {
        if time <= frame {
            key = i;
        } else {
            break;
        }
    }
    let key_start = channel.key_times.get(key).copied().unwrap_or(0);
    let key_end = channel
        .key_times
        .get(key + 1)
        .copied()
        .unwrap_or_else(|| num_frames.saturating_sub(1).max(key_start));
    let t = if key_end > key_start {
        frame.saturating_sub(key_start) as f32 / (key_end - key_start) as f32
    } else {
        0.0
    };

    let set = |i: usize| channel.sets[(key + i).min(channel.sets.len() - 1)];
    let (p0, p1, p2, p3) = (set(0), set(1), set(2), set(3));

    let mut out = [0.0f32; 4];
    for c in 0..channel.kind.components() {
        out[c] = cubic(p0[c], p1[c], p2[c], p3[c], t);
    }
    out
}

/// Deterministic probe grid over a dimension: up to four spread indices.
fn probe_indices(count: u16) -> Vec<u32> {
    let count = count as u32;
    if count == 0 {
        return Vec::new();
    }
    let mut out = vec![0, count / 3, count * 2 / 3, count - 1];
    out.dedup();
    out.retain(|&i| i < count);
    out
}

/// Plausibility score of a trial decode, sampled at a fixed grid of
/// (frame, bone) pairs.
fn score_trial(anim: &Animation<'_>, channels: &[Channel], mask_density: f32) -> f64 {
    let frames = probe_indices(anim.num_frames);
    let bones = probe_indices(anim.num_bones);
    let num_frames = anim.num_frames as u32;

    let mut score = 0.0f64;
    for channel in channels {
        if !bones.contains(&(channel.bone as u32)) {
            continue;
        }
        for &frame in &frames {
            let v = sample_channel(channel, frame, num_frames);
            match channel.kind {
                ChannelKind::Translation => {
                    for &c in &v[..3] {
                        if !c.is_finite() {
                            score += PENALTY_NON_FINITE;
                        }
                    }
                    let mag = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
                    if mag.is_finite() {
                        if mag > 1.0e5 {
                            score += PENALTY_HUGE_TRANSLATION * (mag.log10() - 5.0) as f64;
                        } else {
                            score += BONUS_SANE_TRANSLATION;
                        }
                    }
                }
                ChannelKind::Scale => {
                    let mut sane = true;
                    for &c in &v[..3] {
                        if !c.is_finite() {
                            score += PENALTY_NON_FINITE;
                            sane = false;
                        } else if c.abs() > 1.0e3 || (c != 0.0 && c.abs() < 1.0e-3) {
                            score += PENALTY_DEGENERATE_SCALE;
                            sane = false;
                        } else if !(1.0e-2..=1.0e2).contains(&c.abs()) {
                            sane = false;
                        }
                    }
                    if sane {
                        score += BONUS_SANE_SCALE;
                    }
                }
                ChannelKind::Rotation => {
                    let mut finite = true;
                    for &c in &v {
                        if !c.is_finite() {
                            score += PENALTY_NON_FINITE;
                            finite = false;
                        }
                    }
                    if finite {
                        let norm =
                            (v[0] * v[0] + v[1] * v[1] + v[2] * v[2] + v[3] * v[3]).sqrt();
                        if (0.9..=1.1).contains(&norm) {
                            score += BONUS_UNIT_ROTATION;
                        } else if !(0.1..=10.0).contains(&norm) {
                            score += PENALTY_BAD_ROTATION;
                        }
                    }
                }
                ChannelKind::Visibility => {}
            }
        }
    }

    score + mask_density as f64 * MASK_DENSITY_WEIGHT
}
