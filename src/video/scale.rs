//! Aspect-preserving scaling plans
//!
//! A plan describes how the decoder must map the input stream onto the
//! configured output geometry so that every frame on its stdout is exactly
//! `out_w * out_h * 3` bytes. Even the identity plan pins an explicit
//! `scale` filter on the decoder; without it a stream that renegotiates its
//! resolution mid-session would silently break the byte framing.

/// How input frames are fitted into the output geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePlan {
    /// Input already matches the output resolution.
    Identity,

    /// Scale to the largest size that fits the output box at the input
    /// aspect ratio, then pad with centered black bars.
    Letterbox {
        scaled_w: u32,
        scaled_h: u32,
        pad_x: u32,
        pad_y: u32,
    },
}

impl ScalePlan {
    /// Derives the plan for the given input and output dimensions.
    ///
    /// Deterministic: the same dimensions always produce the same plan.
    pub fn derive(input: (u32, u32), output: (u32, u32)) -> Self {
        let (in_w, in_h) = input;
        let (out_w, out_h) = output;

        if (in_w, in_h) == (out_w, out_h) {
            return ScalePlan::Identity;
        }

        // Compare aspect ratios without floats: in_w/in_h > out_w/out_h.
        let (scaled_w, scaled_h) = if in_w as u64 * out_h as u64 > out_w as u64 * in_h as u64 {
            // Input is wider: fit to width.
            (out_w, (out_w as u64 * in_h as u64 / in_w as u64) as u32)
        } else {
            // Input is taller or equal: fit to height.
            ((out_h as u64 * in_w as u64 / in_h as u64) as u32, out_h)
        };

        ScalePlan::Letterbox {
            scaled_w,
            scaled_h,
            pad_x: (out_w - scaled_w) / 2,
            pad_y: (out_h - scaled_h) / 2,
        }
    }

    /// ffmpeg `-vf` expression realizing this plan at the given output
    /// dimensions.
    pub fn filter_expr(&self, out_w: u32, out_h: u32) -> String {
        match self {
            ScalePlan::Identity => format!("scale={}:{}", out_w, out_h),
            ScalePlan::Letterbox {
                scaled_w,
                scaled_h,
                pad_x,
                pad_y,
            } => format!(
                "scale={}:{},pad={}:{}:{}:{}:black",
                scaled_w, scaled_h, out_w, out_h, pad_x, pad_y
            ),
        }
    }
}
