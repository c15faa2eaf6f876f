//! Codec parameter selection
//!
//! Pure mapping from the relay configuration to the ffmpeg encoder
//! argument set. Recomputed on every encoder spawn, so restarts always
//! re-emit identical parameters.

use crate::config::{Codec, RelayConfig};

/// Encoder-side arguments placed between `-i pipe:0` and the output URL.
pub fn encoder_args(config: &RelayConfig) -> Vec<String> {
    let mut args: Vec<String> = vec!["-c:v".into(), config.codec.encoder_name().into()];

    if config.codec == Codec::Copy {
        // Stream copy: every encoder control is suppressed.
        return args;
    }

    args.extend([
        "-b:v".into(),
        config.bitrate.clone(),
        "-g".into(),
        config.gop.to_string(),
        "-r".into(),
        config.fps.to_string(),
        "-preset".into(),
        config.preset.as_str().into(),
    ]);

    match config.codec {
        Codec::H264 => {
            args.extend([
                "-tune".into(),
                "zerolatency".into(),
                "-profile:v".into(),
                "main".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-force_key_frames".into(),
                format!("expr:gte(t,n_forced*{}/{})", config.gop, config.fps),
            ]);
        }
        Codec::H265 => {
            args.extend([
                "-x265-params".into(),
                format!(
                    "no-repeat-headers=1:keyint={gop}:min-keyint={gop}",
                    gop = config.gop
                ),
            ]);
        }
        Codec::Copy => {}
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;

    fn config(codec: Codec) -> RelayConfig {
        let mut cfg = RelayConfig::new("rtsp://in/s".into(), "rtsp://out/s".into());
        cfg.codec = codec;
        cfg
    }

    #[test]
    fn h264_parameter_set() {
        let args = encoder_args(&config(Codec::H264));
        let joined = args.join(" ");
        assert!(joined.starts_with("-c:v libx264"));
        assert!(joined.contains("-b:v 2M"));
        assert!(joined.contains("-g 30"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-tune zerolatency"));
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-force_key_frames expr:gte(t,n_forced*30/30)"));
    }

    #[test]
    fn h265_parameter_set() {
        let mut cfg = config(Codec::H265);
        cfg.gop = 60;
        cfg.preset = Preset::Fast;
        let joined = encoder_args(&cfg).join(" ");
        assert!(joined.starts_with("-c:v libx265"));
        assert!(joined.contains("-preset fast"));
        assert!(joined.contains("-x265-params no-repeat-headers=1:keyint=60:min-keyint=60"));
        assert!(!joined.contains("pix_fmt"));
    }

    #[test]
    fn copy_suppresses_all_encoder_controls() {
        let args = encoder_args(&config(Codec::Copy));
        assert_eq!(args, vec!["-c:v".to_string(), "copy".to_string()]);
    }

    #[test]
    fn restart_reemits_identical_parameters() {
        let cfg = config(Codec::H264);
        assert_eq!(encoder_args(&cfg), encoder_args(&cfg));
    }
}
