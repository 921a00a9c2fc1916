//! Engine command lines.

/// Muxer flags for MP4 output that a client can play while it is still
/// being written: no trailing index, one fragment per keyframe.
const FRAGMENTED_MP4_FLAGS: &str = "frag_keyframe+empty_moov+default_base_moof";

/// Normalized output of a re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeTarget {
    Mp3Audio,
    Mp4Video,
}

impl TranscodeTarget {
    pub fn for_kind(is_audio: bool) -> Self {
        if is_audio {
            Self::Mp3Audio
        } else {
            Self::Mp4Video
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp3Audio => "audio/mpeg",
            Self::Mp4Video => "video/mp4",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3Audio => ".mp3",
            Self::Mp4Video => ".mp4",
        }
    }
}

fn input_args(args: &mut Vec<String>, url: &str, user_agent: &str) {
    args.extend([
        "-user_agent".to_string(),
        user_agent.to_string(),
        "-i".to_string(),
        url.to_string(),
    ]);
}

fn output_args(args: &mut Vec<String>) {
    args.extend(
        ["-loglevel", "warning", "-nostdin", "pipe:1"]
            .into_iter()
            .map(String::from),
    );
}

/// Stream-copy the video of one input and the audio of another into fragmented MP4.
pub fn mux_args(video_url: &str, audio_url: &str, user_agent: &str) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string()];
    input_args(&mut args, video_url, user_agent);
    input_args(&mut args, audio_url, user_agent);

    args.extend(
        [
            "-map",
            "0:v",
            "-map",
            "1:a",
            "-c:v",
            "copy",
            "-c:a",
            "copy",
            "-movflags",
            FRAGMENTED_MP4_FLAGS,
            "-max_muxing_queue_size",
            "1024",
            "-f",
            "mp4",
        ]
        .into_iter()
        .map(String::from),
    );

    output_args(&mut args);
    args
}

/// Re-encode one input into `target`.
pub fn transcode_args(source_url: &str, target: TranscodeTarget, user_agent: &str) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string()];
    input_args(&mut args, source_url, user_agent);

    let codec_args: &[&str] = match target {
        TranscodeTarget::Mp3Audio => &["-vn", "-c:a", "libmp3lame", "-b:a", "192k", "-f", "mp3"],
        TranscodeTarget::Mp4Video => &[
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            FRAGMENTED_MP4_FLAGS,
            "-max_muxing_queue_size",
            "1024",
            "-f",
            "mp4",
        ],
    };
    args.extend(codec_args.iter().map(|arg| arg.to_string()));

    output_args(&mut args);
    args
}
