use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Collect streamed media URLs and reassemble them into playable files",
    long_about = "Reads the media URLs observed on a page, either as JSON ({\"videoUrls\": [...]})\n\
                  or one URL per line, plans the minimal set of downloads (a manifest always wins\n\
                  over loose fragments of the same stream), fetches them and muxes the results\n\
                  losslessly with ffmpeg."
)]
pub struct CliArgs {
    /// URL list file; reads stdin when omitted or `-`
    pub input: Option<PathBuf>,

    /// Directory where finished files are written
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum number of jobs running at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    pub ffmpeg: Option<String>,

    /// Configuration file (JSON); defaults to the per-user config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Page title used to name the output files
    #[arg(short, long)]
    pub title: Option<String>,

    /// Page the URLs were observed on; sent as Referer/Origin
    #[arg(long)]
    pub page_url: Option<String>,

    /// Print the plan as JSON without downloading anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let args = CliArgs::parse_from([
            "video-collector",
            "urls.txt",
            "-o",
            "out",
            "--concurrency",
            "2",
            "--ffmpeg",
            "/usr/bin/ffmpeg",
            "--title",
            "Lecture",
            "--dry-run",
        ]);
        assert_eq!(args.input, Some(PathBuf::from("urls.txt")));
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.concurrency, Some(2));
        assert_eq!(args.ffmpeg.as_deref(), Some("/usr/bin/ffmpeg"));
        assert_eq!(args.title.as_deref(), Some("Lecture"));
        assert!(args.dry_run);
        assert!(!args.verbose);
    }
}
