//! Per-bone skeletal animation decoding.
//!
//! An animation header names one of several wire encodings. Types 1 and 4
//! are a straight linear decode (`masked`); types 6 through 10 are the
//! bit-packed quantized keyframe family whose stream parameters cannot be
//! recovered deterministically and are found by trial decoding
//! (`keyframe`). Decoding is lazy: samples are produced on first access
//! and cached, and repeated decodes are bitwise identical.

use std::sync::OnceLock;

use glam::{Vec2, Vec4};
use tracing::warn;

use leshy_common::Platform;

use crate::context::LoadContext;

pub mod keyframe;
pub mod masked;

/// Total sample-table cap: `num_frames * num_bones` above this is
/// rejected outright rather than allocated.
pub const MAX_SAMPLES: usize = 1 << 22;

/// One decoded pose sample for one bone at one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub translation: Vec4,
    pub rotation: Vec4,
    pub scale: Vec4,
    pub visible: bool,
}

impl Sample {
    /// The bind pose: identity transform, visible.
    pub const BIND: Sample = Sample {
        translation: Vec4::ZERO,
        rotation: Vec4::new(0.0, 0.0, 0.0, 1.0),
        scale: Vec4::ONE,
        visible: true,
    };
}

/// How a decode attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Samples are available.
    Decoded,
    /// The animation carries no sampled data (type 0).
    PoseOnly,
    /// No plausible decode was found; render at bind pose.
    Failed,
    /// The animation type is not understood.
    Unsupported,
}

/// Diagnostic data from a heuristic decode, returned by value.
#[derive(Debug, Clone)]
pub struct DecodeDiagnostics {
    /// Mask-block candidates that passed the plausibility filter.
    pub candidates: usize,
    /// Full trial decodes attempted.
    pub trials: usize,
    /// Score of the winning trial.
    pub winning_score: f64,
    /// Byte offset of the winning mask block.
    pub chosen_offset: usize,
    /// Whether the winning trial read stream headers big-endian.
    pub stream_big_endian: bool,
    /// Whether the winning trial read the parameter block big-endian.
    pub param_big_endian: bool,
    /// Whether the parameter offset was interpreted as absolute.
    pub param_absolute: bool,
    /// Fraction of bones with a non-zero channel mask.
    pub mask_density: f32,
}

/// The result of decoding an animation.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub status: DecodeStatus,
    pub num_frames: usize,
    pub num_bones: usize,
    /// Frame-major samples: `samples[frame * num_bones + bone]`.
    samples: Vec<Sample>,
    /// Frame-major UV-bone offsets (types 1/4 only).
    pub uv_samples: Vec<Vec2>,
    /// Frame-major float-stream values (types 1/4 only).
    pub float_samples: Vec<f32>,
    pub diagnostics: Option<DecodeDiagnostics>,
}

impl DecodeOutcome {
    fn empty(status: DecodeStatus) -> Self {
        Self {
            status,
            num_frames: 0,
            num_bones: 0,
            samples: Vec::new(),
            uv_samples: Vec::new(),
            float_samples: Vec::new(),
            diagnostics: None,
        }
    }

    pub(crate) fn pose_only() -> Self {
        Self::empty(DecodeStatus::PoseOnly)
    }

    pub(crate) fn failed() -> Self {
        Self::empty(DecodeStatus::Failed)
    }

    pub(crate) fn unsupported() -> Self {
        Self::empty(DecodeStatus::Unsupported)
    }

    pub(crate) fn decoded(num_frames: usize, num_bones: usize, samples: Vec<Sample>) -> Self {
        Self {
            status: DecodeStatus::Decoded,
            num_frames,
            num_bones,
            samples,
            uv_samples: Vec::new(),
            float_samples: Vec::new(),
            diagnostics: None,
        }
    }

    /// The sample for `(frame, bone)`, if decoded.
    pub fn sample(&self, frame: usize, bone: usize) -> Option<&Sample> {
        if self.status != DecodeStatus::Decoded || frame >= self.num_frames || bone >= self.num_bones
        {
            return None;
        }
        self.samples.get(frame * self.num_bones + bone)
    }

    /// All samples, frame-major.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// A skeletal animation as referenced by a tree.
///
/// Holds borrowed views of the chunk buffers; sample data is decoded on
/// first access and cached behind a [`OnceLock`] so concurrent first
/// decodes are safe and decoding stays idempotent.
#[derive(Debug)]
pub struct Animation<'a> {
    pub name: Option<String>,
    pub ty: u32,
    pub num_frames: u16,
    pub num_bones: u16,
    pub num_uv_bones: u16,
    pub num_float_streams: u16,
    /// Declared stream region size; informational, the decoder trusts
    /// bounds checks over it.
    pub stream_size: u32,
    /// Declared parameter region size; informational.
    pub param_size: u32,
    pub(crate) data: &'a [u8],
    /// Resolved stream anchor offset, if the stored pointer was usable.
    pub(crate) anchor: Option<usize>,
    /// Raw stored parameter offset; interpretation (absolute/relative) is
    /// part of the heuristic search space.
    pub(crate) param_ptr: i32,
    pub(crate) platform: Platform,
    cache: OnceLock<DecodeOutcome>,
}

impl<'a> Animation<'a> {
    /// Serialized size of an animation record.
    pub const WIRE_SIZE: usize = 32;

    /// Load an animation record at `base`.
    pub fn load(ctx: &LoadContext<'a>, base: usize) -> Animation<'a> {
        let name = ctx.read_string_pointer(base).map(str::to_owned);
        let ty = ctx.read_u32(base + 4);
        let num_frames = ctx.read_u16(base + 8);
        let num_bones = ctx.read_u16(base + 10);
        let num_uv_bones = ctx.read_u16(base + 12);
        let num_float_streams = ctx.read_u16(base + 14);
        let stream_ptr = ctx.read_pointer(base + 16);
        let stream_size = ctx.read_u32(base + 20);
        let param_ptr = ctx.read_pointer(base + 24);
        let param_size = ctx.read_u32(base + 28);

        let anchor = ctx.resolve_pointer(stream_ptr);
        if anchor.is_none() && ty != 0 {
            warn!(stream_ptr, ty, "animation stream pointer invalid, decode will fail");
        }

        Animation {
            name,
            ty,
            num_frames,
            num_bones,
            num_uv_bones,
            num_float_streams,
            data: ctx.cpu(),
            anchor,
            stream_size,
            param_ptr,
            param_size,
            platform: ctx.platform(),
            cache: OnceLock::new(),
        }
    }

    /// Decode the animation, caching the result.
    ///
    /// Idempotent: every call returns the same outcome by reference.
    pub fn decode(&self) -> &DecodeOutcome {
        self.cache.get_or_init(|| self.run_decode())
    }

    /// Decode bypassing the cache, returning the outcome (with
    /// diagnostics) by value. Intended for format debugging.
    pub fn decode_traced(&self) -> DecodeOutcome {
        self.run_decode()
    }

    fn run_decode(&self) -> DecodeOutcome {
        let total = self.num_frames as usize * self.num_bones as usize;
        if total > MAX_SAMPLES {
            warn!(
                num_frames = self.num_frames,
                num_bones = self.num_bones,
                "sample table implausibly large, decode rejected"
            );
            return DecodeOutcome::failed();
        }

        match self.ty {
            0 => DecodeOutcome::pose_only(),
            1 | 4 => masked::decode(self),
            6..=10 => keyframe::decode(self),
            other => {
                warn!(ty = other, "unsupported animation type");
                DecodeOutcome::unsupported()
            }
        }
    }

    /// The cached sample for `(frame, bone)`.
    ///
    /// `None` when out of range, when the type is unsupported, or when
    /// decoding failed; callers then render the bind pose.
    pub fn get_sample(&self, frame: usize, bone: usize) -> Option<Sample> {
        self.decode().sample(frame, bone).copied()
    }

    /// Decode, surfacing a failed heuristic search as an error.
    pub fn try_decode(&self) -> crate::Result<&DecodeOutcome> {
        let outcome = self.decode();
        if outcome.status == DecodeStatus::Failed {
            return Err(crate::Error::UnresolvableAnimation);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type0_is_pose_only() {
        let data = [0u8; 64];
        let ctx = LoadContext::new(&data, Platform::pc());
        let anim = Animation::load(&ctx, 0);

        assert_eq!(anim.ty, 0);
        assert_eq!(anim.decode().status, DecodeStatus::PoseOnly);
        assert_eq!(anim.get_sample(0, 0), None);
    }

    #[test]
    fn test_unsupported_type() {
        let mut data = vec![0u8; 64];
        data[4..8].copy_from_slice(&99u32.to_le_bytes());
        let ctx = LoadContext::new(&data, Platform::pc());
        let anim = Animation::load(&ctx, 0);

        assert_eq!(anim.decode().status, DecodeStatus::Unsupported);
    }

    #[test]
    fn test_sample_out_of_range() {
        let outcome = DecodeOutcome::decoded(2, 1, vec![Sample::BIND, Sample::BIND]);

        assert!(outcome.sample(0, 0).is_some());
        assert!(outcome.sample(2, 0).is_none());
        assert!(outcome.sample(0, 1).is_none());
    }

    #[test]
    fn test_oversized_table_rejected() {
        let mut data = vec![0u8; 64];
        data[4..8].copy_from_slice(&6u32.to_le_bytes());
        data[8..10].copy_from_slice(&u16::MAX.to_le_bytes());
        data[10..12].copy_from_slice(&u16::MAX.to_le_bytes());
        let ctx = LoadContext::new(&data, Platform::pc());
        let anim = Animation::load(&ctx, 0);

        assert_eq!(anim.decode().status, DecodeStatus::Failed);
    }
}
