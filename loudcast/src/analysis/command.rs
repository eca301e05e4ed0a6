//! Structured construction of the analysis command line.
//!
//! The command is always built as an argument vector; nothing here passes
//! through a shell, so a filename with spaces or metacharacters stays a
//! single argument and cannot change the invocation. The waveform color
//! is validated at configuration load before it can reach this point.

use std::path::Path;

/// Dimensions of the rendered waveform image.
const WAVEFORM_SIZE: &str = "700x120";

/// EBU R128 loudness scan parameters, summary output format.
const LOUDNORM_FILTER: &str = "loudnorm=I=-16:dual_mono=true:TP=-1.5:LRA=11:print_format=summary";

/// A fully-formed subprocess invocation: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Build the loudness scan for one stored upload.
    ///
    /// A single ffmpeg pass doing two things: renders a waveform PNG next
    /// to the input file, and runs the loudnorm filter in summary mode
    /// with the decoded output discarded (`-f null -`).
    pub fn loudness_scan(program: &str, input: &Path, graph_color: &str) -> Self {
        let input = input.to_string_lossy();
        Self {
            program: program.to_string(),
            args: vec![
                "-i".to_string(),
                input.to_string(),
                "-y".to_string(),
                "-filter_complex".to_string(),
                format!(
                    "aformat=channel_layouts=stereo,showwavespic=s={WAVEFORM_SIZE}:colors={graph_color}|0000000"
                ),
                "-frames:v".to_string(),
                "1".to_string(),
                format!("{input}.png"),
                "-af".to_string(),
                LOUDNORM_FILTER.to_string(),
                "-f".to_string(),
                "null".to_string(),
                "-".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builds_waveform_and_loudnorm_pass() {
        let input = PathBuf::from("/srv/files/track.mp3");
        let invocation = Invocation::loudness_scan("ffmpeg", &input, "0099CE");

        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(invocation.args[0], "-i");
        assert_eq!(invocation.args[1], "/srv/files/track.mp3");
        assert!(invocation.args.contains(&"/srv/files/track.mp3.png".to_string()));
        assert!(
            invocation
                .args
                .iter()
                .any(|arg| arg.contains("showwavespic") && arg.contains("colors=0099CE|0000000"))
        );
        assert!(invocation.args.contains(&LOUDNORM_FILTER.to_string()));
        assert_eq!(invocation.args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn hostile_filename_stays_one_argument() {
        // With argv construction there is no shell to interpret this
        let input = PathBuf::from("/srv/files/song\"; rm -rf $HOME;.mp3");
        let invocation = Invocation::loudness_scan("ffmpeg", &input, "0099CE");

        assert_eq!(invocation.args[1], "/srv/files/song\"; rm -rf $HOME;.mp3");
        assert_eq!(
            invocation.args.iter().filter(|arg| arg.contains("rm -rf")).count(),
            2 // the input path and its derived .png, nothing else
        );
    }
}
