use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::AudioTranscoder;

/// Downloads a local-network media URL into a temp file so it can be handed
/// to the remote client, which only accepts file paths.
pub async fn download_temp_file(
    http: &reqwest::Client,
    dir: &Path,
    url: &str,
    filename: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create media dir {}", dir.display()))?;

    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let path = dir.join(format!("{unique}-{}", sanitize_filename(filename)));

    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()?;

    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    Ok(path)
}

fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Transcodes between the remote voice codec (silk) and ogg by shelling out
/// to ffmpeg and the silk codec binaries. The remote PCM intermediate is
/// signed 16-bit little-endian mono at 24kHz.
pub struct CommandLineTranscoder {
    pub ffmpeg: PathBuf,
    pub silk_encoder: PathBuf,
    pub silk_decoder: PathBuf,
    pub work_dir: PathBuf,
}

impl CommandLineTranscoder {
    fn stem(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string())
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", program.display()))?;
        if !status.success() {
            return Err(anyhow!(
                "{} exited with {status} (args: {args:?})",
                program.display()
            ));
        }
        Ok(())
    }
}

fn pcm_to_ogg_args(pcm: &Path, ogg: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        "24000".into(),
        "-ac".into(),
        "1".into(),
        "-i".into(),
        pcm.to_string_lossy().into_owned(),
        ogg.to_string_lossy().into_owned(),
    ]
}

fn ogg_to_pcm_args(ogg: &Path, pcm: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        ogg.to_string_lossy().into_owned(),
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        "24000".into(),
        "-ac".into(),
        "1".into(),
        pcm.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl AudioTranscoder for CommandLineTranscoder {
    async fn silk_to_ogg(&self, path: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let stem = Self::stem(path);
        let pcm = self.work_dir.join(format!("{stem}.pcm"));
        let ogg = self.work_dir.join(format!("{stem}.ogg"));

        self.run(
            &self.silk_decoder,
            &[
                path.to_string_lossy().into_owned(),
                pcm.to_string_lossy().into_owned(),
            ],
        )
        .await?;
        self.run(&self.ffmpeg, &pcm_to_ogg_args(&pcm, &ogg)).await?;
        Ok(ogg)
    }

    async fn ogg_to_silk(&self, path: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let stem = Self::stem(path);
        let pcm = self.work_dir.join(format!("{stem}.pcm"));
        let silk = self.work_dir.join(format!("{stem}.slk"));

        self.run(&self.ffmpeg, &ogg_to_pcm_args(path, &pcm)).await?;
        self.run(
            &self.silk_encoder,
            &[
                pcm.to_string_lossy().into_owned(),
                silk.to_string_lossy().into_owned(),
                "-tencent".into(),
            ],
        )
        .await?;
        Ok(silk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_separators_out_of_filenames() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("report v2.pdf"), "report_v2.pdf");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn pcm_to_ogg_command_pins_remote_pcm_format() {
        let args = pcm_to_ogg_args(Path::new("a.pcm"), Path::new("a.ogg"));
        assert_eq!(
            args,
            vec!["-y", "-f", "s16le", "-ar", "24000", "-ac", "1", "-i", "a.pcm", "a.ogg"]
        );
    }

    #[test]
    fn ogg_to_pcm_command_pins_remote_pcm_format() {
        let args = ogg_to_pcm_args(Path::new("v.ogg"), Path::new("v.pcm"));
        assert_eq!(
            args,
            vec!["-y", "-i", "v.ogg", "-f", "s16le", "-ar", "24000", "-ac", "1", "v.pcm"]
        );
    }
}
