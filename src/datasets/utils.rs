use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use anyhow::Result;
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tar::Archive;
use zip::ZipArchive;

/// Blocking HTTP download with an indicatif progress bar.
pub struct RemoteFile {
    response: reqwest::blocking::Response,
    downloaded: u64,
    pbar: Option<ProgressBar>,
}

impl RemoteFile {
    pub fn open(url: &str) -> Result<Self> {
        Self::with_config(url, 3600, true)
    }

    pub fn with_config(url: &str, timeout_secs: u64, show_pbar: bool) -> Result<Self> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(url)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .send()?
            .error_for_status()?;

        let pbar = if show_pbar {
            let pbar = match response.content_length() {
                Some(total) => ProgressBar::new(total),
                None => ProgressBar::new_spinner(),
            };
            pbar.set_style(ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                .progress_chars("#>-"));
            pbar.set_message(format!("Downloading {}", url));
            Some(pbar)
        } else {
            None
        };
        Ok(Self {
            response,
            downloaded: 0,
            pbar,
        })
    }
}

impl Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.response.read(buf)?;
        self.downloaded += size as u64;
        if let Some(pbar) = &self.pbar {
            pbar.set_position(self.downloaded);
        }
        Ok(size)
    }
}

pub enum ArchiveFormat {
    Zip,
    TarGz,
}

fn download_to_tempfile(url: &str) -> Result<File> {
    let mut remote = RemoteFile::open(url)?;
    let mut local = tempfile::tempfile()?;
    std::io::copy(&mut remote, &mut local)?;
    local.seek(SeekFrom::Start(0))?;
    Ok(local)
}

/// Download an archive and unpack all of it under `dest`.
pub fn download_and_extract<P: AsRef<Path>>(
    url: &str,
    dest: P,
    format: ArchiveFormat,
) -> Result<()> {
    let archive = download_to_tempfile(url)?;
    match format {
        ArchiveFormat::Zip => ZipArchive::new(archive)?.extract(dest)?,
        ArchiveFormat::TarGz => Archive::new(GzDecoder::new(archive)).unpack(dest)?,
    }
    Ok(())
}

/// Download a zip archive and extract only the named entries, flattened into
/// `dest` under their base names.
pub fn download_zip_entries<P: AsRef<Path>>(url: &str, dest: P, entries: &[&str]) -> Result<()> {
    let dest = dest.as_ref();
    std::fs::create_dir_all(dest)?;
    let mut archive = ZipArchive::new(download_to_tempfile(url)?)?;
    for name in entries {
        let filename = name.split('/').last().unwrap_or(name);
        std::io::copy(
            &mut archive.by_name(name)?,
            &mut File::create(dest.join(filename))?,
        )?;
    }
    Ok(())
}
